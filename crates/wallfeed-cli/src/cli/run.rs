use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use wallfeed_core::models::{HistoryUpdate, MessageIndex, SourceId};
use wallfeed_core::store::MemoryStore;
use wallfeed_core::wall::read_state::max_read_before;
use wallfeed_core::{LoadingAction, WallFeed};

use super::config::CliConfig;
use super::fixture::Fixture;
use super::output::{print_json, SourceOutput, ViewOutput};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: CliConfig,
    pub pretty: bool,
    /// Upper bound on every wait for the engine.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Print the initial window.
    Show,
    /// Slide the window towards newer messages `steps` times.
    Scroll { steps: usize },
    /// Run up to `pages` load-all requests.
    LoadAll { pages: usize },
    /// Mark the initial window read up to `before` (unix seconds), or
    /// entirely.
    MarkRead { before: Option<i32> },
    /// List fixture sources and whether the filter includes them.
    Sources,
}

pub async fn run(options: RunOptions, action: Action) -> Result<()> {
    let fixture = match &options.config.fixture {
        Some(path) => Fixture::load(path)?,
        None => Fixture::demo(),
    };
    let source_ids: Vec<SourceId> = fixture.sources.iter().map(|source| SourceId(source.id)).collect();
    let store = fixture.into_store()?;

    if action == Action::Sources {
        return print_sources(&store, &source_ids, &options);
    }

    let mut settings = options.config.settings.clone();
    if matches!(action, Action::MarkRead { .. }) {
        settings.mark_as_read = true;
    }
    let (_settings_tx, settings_rx) = watch::channel(settings);
    let feed = WallFeed::spawn(Arc::new(store.clone()), options.config.wall.clone(), settings_rx);

    let result = drive(&feed, &store, &source_ids, action, &options).await;
    if let Err(e) = feed.shutdown() {
        tracing::debug!("wall already stopped: {}", e);
    }
    result
}

async fn drive(
    feed: &WallFeed,
    store: &MemoryStore,
    source_ids: &[SourceId],
    action: Action,
    options: &RunOptions,
) -> Result<()> {
    let first = first_view(feed, options.timeout).await?;

    match action {
        Action::Show | Action::Sources => print_json(&ViewOutput::from_update(&first), options.pretty),
        Action::Scroll { steps } => {
            let mut history = feed.history_view();
            history.borrow_and_update();
            let mut views = vec![ViewOutput::from_update(&first)];
            let mut current = first;

            for step in 0..steps {
                if !current.view.hole_later {
                    tracing::info!("reached the newest messages after {} steps", step);
                    break;
                }
                feed.load_more()?;
                tokio::time::timeout(options.timeout, history.changed())
                    .await
                    .context("Timed out waiting for the next window")?
                    .context("Wall engine stopped")?;
                settle(feed, options.timeout).await?;
                current = history
                    .borrow_and_update()
                    .clone()
                    .context("Wall published no view")?;
                views.push(ViewOutput::from_update(&current));
            }
            print_json(&views, options.pretty)
        }
        Action::LoadAll { pages } => {
            let mut actions = feed.loading_actions();
            for page in 0..pages {
                feed.load_all()?;
                wait_load_all_ended(&mut actions, options.timeout).await?;
                let exhausted = feed
                    .history_view()
                    .borrow()
                    .as_ref()
                    .is_some_and(|update| !update.view.hole_earlier);
                if exhausted {
                    tracing::info!("full history loaded after {} pages", page + 1);
                    break;
                }
            }
            let update = feed
                .history_view()
                .borrow()
                .clone()
                .context("Wall published no view")?;
            print_json(&ViewOutput::from_update(&update), options.pretty)
        }
        Action::MarkRead { before } => {
            let threshold = match (before, first.view.newest()) {
                (Some(timestamp), _) => MessageIndex::upper_bound(SourceId(0), timestamp),
                (None, Some(newest)) => newest.index(),
                (None, None) => return print_sources(store, source_ids, options),
            };
            let expected = max_read_before(&first.view.entries, threshold);
            feed.mark_all_messages_read(threshold)?;

            tokio::time::timeout(options.timeout, async {
                while !expected
                    .iter()
                    .all(|(source, index)| store.read_position(*source).is_some_and(|read| read >= *index))
                {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .context("Timed out waiting for read positions")?;
            print_sources(store, source_ids, options)
        }
    }
}

/// Wait for the first published view and for loading to finish.
async fn first_view(feed: &WallFeed, timeout: Duration) -> Result<HistoryUpdate> {
    let mut history = feed.history_view();
    tokio::time::timeout(timeout, history.wait_for(Option::is_some))
        .await
        .context("Timed out waiting for the first window; does a source still have a pending gap?")?
        .context("Wall engine stopped")?;
    settle(feed, timeout).await?;

    let update = history.borrow().clone();
    update.context("Wall published no view")
}

async fn settle(feed: &WallFeed, timeout: Duration) -> Result<()> {
    let mut loading = feed.is_loading();
    tokio::time::timeout(timeout, loading.wait_for(|loading| !*loading))
        .await
        .context("Timed out waiting for the wall to finish loading")?
        .context("Wall engine stopped")?;
    Ok(())
}

async fn wait_load_all_ended(
    actions: &mut broadcast::Receiver<LoadingAction>,
    timeout: Duration,
) -> Result<()> {
    tokio::time::timeout(timeout, async {
        loop {
            match actions.recv().await {
                Ok(LoadingAction::Ended { load_all: true }) => return Ok(()),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("skipped {} loading actions", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("Wall engine stopped")
                }
            }
        }
    })
    .await
    .context("Timed out waiting for load-all")?
}

fn print_sources(store: &MemoryStore, source_ids: &[SourceId], options: &RunOptions) -> Result<()> {
    let predicate = wallfeed_core::FilterPredicate::from_settings(&options.config.settings);
    let sources: Vec<SourceOutput> = source_ids
        .iter()
        .filter_map(|id| store.source(*id))
        .map(|record| SourceOutput::new(&record, &predicate))
        .collect();
    print_json(&sources, options.pretty)
}
