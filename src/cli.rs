use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Base directory holding config.yaml, templates/ and index/
    #[clap(short, long, default_value = ".")]
    pub data_dir: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start memedex as a service.
    Daemon {},

    /// Rebuild the embeddings index from every template.
    Sync {
        /// Refetch source pages even when scraped content already exists
        #[clap(long, default_value = "false")]
        force_rescrape: bool,
    },

    /// Index only templates that are missing from the index.
    Repair {
        /// Refetch source pages even when scraped content already exists
        #[clap(long, default_value = "false")]
        force_rescrape: bool,

        /// Process missing templates in batches of this size
        #[clap(long)]
        batch_size: Option<usize>,
    },

    /// Rewrite index metadata from current template configs without
    /// recomputing any embeddings.
    RefreshMeta {},

    /// Search templates by natural-language text.
    Search {
        /// Search query
        query: String,

        /// Number of results to return
        #[clap(short, long)]
        n: Option<usize>,

        /// Only templates added on or after this date (YYYY-MM-DD)
        #[clap(long)]
        from: Option<String>,

        /// Only templates added on or before this date (YYYY-MM-DD)
        #[clap(long)]
        to: Option<String>,
    },

    /// Look up one template by id.
    Get {
        /// Template id
        id: String,
    },

    /// List all indexed template ids.
    List {},
}
