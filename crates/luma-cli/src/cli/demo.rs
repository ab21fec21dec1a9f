//! Multi-session gallery simulation against the in-memory hosted database.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use luma_core::constants::QUICK_REACTIONS;
use luma_core::models::{Image, InteractionKind};
use luma_core::pagination::PaginationState;
use luma_core::source::{ImageSource, StaticImageSource, UnsplashSource};
use luma_core::subscription::{QueryShape, QuerySnapshot, QueryStatus};
use luma_core::sync::MemoryHub;
use luma_core::views::{self, ReactionCount};
use luma_core::{CoreConfig, CoreRuntime, Database};

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub sessions: usize,
    pub pages: usize,
    /// Use the built-in placeholder catalog even when an Unsplash key is configured
    pub offline: bool,
    pub timeout: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            sessions: 2,
            pages: 1,
            offline: false,
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub name: String,
    pub color: String,
    pub images: usize,
    pub interactions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryRow {
    pub image_id: String,
    pub alt_text: String,
    pub reactions: Vec<ReactionCount>,
    pub comments: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRow {
    pub at: String,
    pub author: String,
    pub kind: String,
    pub content: String,
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoReport {
    pub sessions: Vec<SessionSummary>,
    pub gallery: Vec<GalleryRow>,
    pub feed: Vec<FeedRow>,
}

fn format_millis(ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn image_source(config: &CoreConfig, offline: bool) -> Arc<dyn ImageSource> {
    match (&config.unsplash_access_key, offline) {
        (Some(key), false) => {
            info!("using Unsplash image source");
            Arc::new(UnsplashSource::with_api_base(
                key.clone(),
                config.unsplash_api_base.clone(),
            ))
        }
        _ => {
            info!("using offline placeholder images");
            Arc::new(StaticImageSource::placeholder(12))
        }
    }
}

/// Process worker results on every session until `done` holds.
fn pump_until(
    sessions: &mut [CoreRuntime],
    timeout: Duration,
    what: &str,
    mut done: impl FnMut(&mut [CoreRuntime]) -> bool,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        for session in sessions.iter_mut() {
            session.process_pending();
        }
        if done(sessions) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("Timed out waiting for {}", what);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn image_count(session: &CoreRuntime) -> usize {
    session.database().with_store(|s| s.image_count())
}

fn interaction_count(session: &CoreRuntime) -> usize {
    session.database().with_store(|s| s.interaction_count())
}

fn settled(session: &CoreRuntime) -> bool {
    session.database().pending_batches() == 0
}

/// One-shot read through a subscription: take the initial snapshot and cancel.
fn snapshot(db: &Database, shape: QueryShape) -> Result<QuerySnapshot> {
    let slot: Rc<RefCell<Option<QuerySnapshot>>> = Rc::new(RefCell::new(None));
    let sink = slot.clone();
    let handle = db.subscribe(shape, move |snapshot| {
        *sink.borrow_mut() = Some(snapshot.clone());
    })?;
    handle.unsubscribe();
    let taken = slot.borrow_mut().take();
    taken.context("subscription delivered no snapshot")
}

pub fn run_demo(config: &CoreConfig, options: &DemoOptions) -> Result<DemoReport> {
    if options.sessions == 0 {
        bail!("at least one session is required");
    }

    let hub = MemoryHub::new();
    let source = image_source(config, options.offline);

    let mut sessions = Vec::with_capacity(options.sessions);
    for n in 1..=options.sessions {
        let mut session_config = config.clone();
        session_config.data_dir = config.data_dir.join(format!("session-{}", n));
        let runtime = CoreRuntime::new(session_config, Arc::new(hub.clone()), source.clone())
            .with_context(|| format!("Failed to start session {}", n))?;
        sessions.push(runtime);
    }

    pump_until(&mut sessions, options.timeout, "hydration", |sessions| {
        sessions.iter().all(|s| s.database().status() == QueryStatus::Ready)
    })?;

    sessions[0].seed();
    pump_until(&mut sessions, options.timeout, "the seed fetch", |sessions| {
        !sessions[0].is_seeding() && settled(&sessions[0])
    })?;
    if image_count(&sessions[0]) == 0 {
        warn!("seed produced no images");
    }

    for page in 1..=options.pages {
        if !sessions[0].load_more(Instant::now()) {
            warn!(page, "pagination did not start a fetch");
            continue;
        }
        pump_until(&mut sessions, options.timeout, "a page fetch", |sessions| {
            sessions[0].pagination_state() == PaginationState::Idle
        })?;
    }

    let expected_images = image_count(&sessions[0]);
    pump_until(&mut sessions, options.timeout, "images on every session", |sessions| {
        sessions.iter().all(|s| image_count(s) == expected_images)
    })?;

    let mut expected_interactions = 0;
    for (n, session) in sessions.iter().enumerate() {
        let mut images: Vec<Image> = session
            .database()
            .with_store(|s| s.images().cloned().collect());
        views::sort_images_newest_first(&mut images);
        let Some(target) = images.get(n % images.len().max(1)) else {
            break;
        };

        session.react(&target.id, QUICK_REACTIONS[n % QUICK_REACTIONS.len()])?;
        session.comment(
            &target.id,
            &format!("{} was here", session.identity().display_name),
        )?;
        expected_interactions += 2;
    }

    pump_until(&mut sessions, options.timeout, "interactions to sync", |sessions| {
        sessions
            .iter()
            .all(|s| settled(s) && interaction_count(s) == expected_interactions)
    })?;

    let report = build_report(&sessions)?;
    for session in sessions.iter_mut() {
        session.shutdown();
    }
    Ok(report)
}

fn build_report(sessions: &[CoreRuntime]) -> Result<DemoReport> {
    let summaries = sessions
        .iter()
        .map(|s| SessionSummary {
            name: s.identity().display_name.clone(),
            color: s.identity().color_tag.clone(),
            images: image_count(s),
            interactions: interaction_count(s),
        })
        .collect();

    let db = sessions[0].database();

    let gallery_snapshot = snapshot(&db, QueryShape::gallery())?;
    let mut nodes = gallery_snapshot.result.images().to_vec();
    views::sort_image_nodes_newest_first(&mut nodes);
    let gallery = nodes
        .iter()
        .map(|node| GalleryRow {
            image_id: node.image.id.to_string(),
            alt_text: node.image.alt_text.clone(),
            reactions: views::reaction_counts(&node.interactions),
            comments: node
                .interactions
                .iter()
                .filter(|i| i.kind == InteractionKind::Comment)
                .count(),
        })
        .collect();

    let feed_snapshot = snapshot(&db, QueryShape::activity_feed())?;
    let feed = views::feed_items(feed_snapshot.result.interactions())
        .into_iter()
        .map(|node| FeedRow {
            at: format_millis(node.interaction.created_at),
            author: node.interaction.author_name,
            kind: node.interaction.kind.to_string(),
            content: node.interaction.content,
            image: node.image.map(|image| image.alt_text),
        })
        .collect();

    Ok(DemoReport {
        sessions: summaries,
        gallery,
        feed,
    })
}
