use std::time::Duration;

use clap::Parser;

mod app;
mod cli;
mod config;
mod enrich;
mod errors;
mod extract;
mod semantic;
mod templates;
#[cfg(test)]
mod tests;
mod web;

use config::Config;

fn spinner(message: &'static str) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new_spinner();
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let config = Config::load_with(&args.data_dir);
    let app = app::App::new(config)?;

    match args.command {
        cli::Command::Daemon {} => {
            web::start_daemon(app);
            Ok(())
        }

        cli::Command::Sync { force_rescrape } => {
            let pb = spinner("rebuilding embeddings index");
            let report = app.rebuild(force_rescrape)?;
            pb.finish_and_clear();

            println!("indexed {}/{} templates", report.succeeded, report.total);
            Ok(())
        }

        cli::Command::Repair {
            force_rescrape,
            batch_size,
        } => {
            let batch_size = batch_size.or(app.config().sync.default_batch_size);

            let pb = spinner("processing templates without embeddings");
            let report = app.repair(force_rescrape, batch_size)?;
            pb.finish_and_clear();

            if report.total == 0 {
                println!("no missing templates found");
            } else {
                println!(
                    "processed {}/{} missing templates",
                    report.succeeded, report.total
                );
            }
            Ok(())
        }

        cli::Command::RefreshMeta {} => {
            let refreshed = app.refresh_metadata()?;
            println!("refreshed metadata for {refreshed} entries");
            Ok(())
        }

        cli::Command::Search { query, n, from, to } => {
            let hits = app.search_templates(&query, n, from.as_deref(), to.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&hits).unwrap());
            Ok(())
        }

        cli::Command::Get { id } => {
            let info = app.get_template(&id)?;
            println!("{}", serde_json::to_string_pretty(&info).unwrap());
            Ok(())
        }

        cli::Command::List {} => {
            for id in app.list_template_ids() {
                println!("{id}");
            }
            Ok(())
        }
    }
}
