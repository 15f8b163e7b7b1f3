//! CLI entry point for the pagewire tool.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use pagewire::{
    FirstPageRequest, GroupEvent, HttpRequest, PageOutcome, QueryPagination, RequestGroup,
    RequestOptions, SerialDispatcher, Session, TransportConfig,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

/// One line of output: a page body with its position in the walk.
#[derive(Debug, Serialize)]
struct PageLine<'a> {
    page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<u64>,
    body: &'a Map<String, Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries page bodies only
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let base = HttpRequest::parse_get(&args.url)
        .with_context(|| format!("invalid collection URL: {}", args.url))?;
    let config = TransportConfig::with_timeouts(args.connect_timeout, args.read_timeout);
    let session = Session::reqwest(&config)?;
    let dispatcher = Arc::new(SerialDispatcher::new("pagewire-delivery")?);

    let group = RequestGroup::with_observer(|event| match event {
        GroupEvent::Started => debug!("requests in flight"),
        GroupEvent::Finished { error: None } => debug!("no request in flight"),
        GroupEvent::Finished { error: Some(error) } => {
            debug!(error = %error, "requests ended with errors");
        }
    });

    let pagination = QueryPagination {
        size_param: args.size_param.clone(),
        cursor_param: args.cursor_param.clone(),
        total_field: args.total_field.clone(),
        next_field: args.next_field.clone(),
    };
    let options = RequestOptions::default().http_errors_as_errors(!args.keep_http_errors);

    let (tx, mut rx) = mpsc::unbounded_channel::<PageOutcome>();
    let first = FirstPageRequest::builder(&session, base)
        .page_size(i64::from(args.page_size))
        .pagination(pagination)
        .options(options)
        .build(dispatcher, move |outcome| {
            if tx.send(outcome).is_err() {
                warn!("page received after shutdown");
            }
        });

    info!(url = %args.url, page_size = first.page_size(), "Walking collection");
    group.add(first.request());
    first.start();

    let mut stdout = io::stdout().lock();
    let mut pages: u32 = 0;
    loop {
        let outcome = tokio::select! {
            outcome = rx.recv() => outcome,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted; cancelling in-flight requests");
                group.cancel();
                bail!("interrupted after {pages} page(s)");
            }
        };
        let Some(outcome) = outcome else {
            bail!("page delivery stopped unexpectedly");
        };

        match outcome {
            PageOutcome::Success {
                body,
                total,
                page,
                next_page,
                response,
            } => {
                debug!(page = page.number(), status = response.status, "page received");
                serde_json::to_writer(
                    &mut stdout,
                    &PageLine {
                        page: page.number(),
                        total,
                        body: &body,
                    },
                )?;
                writeln!(stdout)?;
                pages += 1;

                let limit_reached = args.max_pages.is_some_and(|max| pages >= max);
                match next_page {
                    Some(next) if !limit_reached => {
                        let request = first.with_page(Some(&next))?;
                        group.add(request.request());
                        request.start();
                    }
                    Some(_) => {
                        info!(pages, "Page limit reached");
                        break;
                    }
                    None => break,
                }
            }
            PageOutcome::Failure {
                page,
                error,
                response,
            } => {
                if let Some(response) = response {
                    debug!(status = response.status, url = %response.url, "error response");
                }
                return Err(anyhow::Error::new(error)
                    .context(format!("failed to fetch page {}", page.number())));
            }
        }
    }

    stdout.flush()?;
    info!(pages, "Walk complete");
    Ok(())
}
