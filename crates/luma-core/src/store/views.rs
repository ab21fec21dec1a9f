//! Ordering and aggregation over delivered snapshots.
//!
//! Query results carry no meaningful order; these helpers give the order the
//! gallery shows. Equal timestamps fall back to ascending id in both
//! directions so every sort is total.

use std::cmp::Ordering;

use serde::Serialize;

use crate::models::{Image, Interaction};
use crate::subscription::{ImageNode, InteractionNode};

fn by_created_at(a: (u64, &str), b: (u64, &str), newest_first: bool) -> Ordering {
    let primary = if newest_first {
        b.0.cmp(&a.0)
    } else {
        a.0.cmp(&b.0)
    };
    primary.then_with(|| a.1.cmp(b.1))
}

/// Most recent first: the activity feed order.
pub fn sort_newest_first(interactions: &mut [Interaction]) {
    interactions.sort_by(|a, b| {
        by_created_at((a.created_at, a.id.as_str()), (b.created_at, b.id.as_str()), true)
    });
}

/// Oldest first: the comment thread order in the focused view.
pub fn sort_oldest_first(interactions: &mut [Interaction]) {
    interactions.sort_by(|a, b| {
        by_created_at((a.created_at, a.id.as_str()), (b.created_at, b.id.as_str()), false)
    });
}

/// Gallery grid order.
pub fn sort_images_newest_first(images: &mut [Image]) {
    images.sort_by(|a, b| {
        by_created_at((a.created_at, a.id.as_str()), (b.created_at, b.id.as_str()), true)
    });
}

/// Gallery grid order for query results that carry their interactions.
pub fn sort_image_nodes_newest_first(nodes: &mut [ImageNode]) {
    nodes.sort_by(|a, b| {
        by_created_at(
            (a.image.created_at, a.image.id.as_str()),
            (b.image.created_at, b.image.id.as_str()),
            true,
        )
    });
}

pub fn sort_images_oldest_first(images: &mut [Image]) {
    images.sort_by(|a, b| {
        by_created_at((a.created_at, a.id.as_str()), (b.created_at, b.id.as_str()), false)
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: usize,
}

/// Tally reactions by emoji in first-seen order. Comments are ignored.
pub fn reaction_counts<'a>(interactions: impl IntoIterator<Item = &'a Interaction>) -> Vec<ReactionCount> {
    let mut counts: Vec<ReactionCount> = Vec::new();
    for interaction in interactions.into_iter().filter(|i| i.is_reaction()) {
        match counts.iter_mut().find(|c| c.emoji == interaction.content) {
            Some(existing) => existing.count += 1,
            None => counts.push(ReactionCount {
                emoji: interaction.content.clone(),
                count: 1,
            }),
        }
    }
    counts
}

/// Activity feed rows, newest first. Unlinked interactions keep `image: None`.
pub fn feed_items(nodes: &[InteractionNode]) -> Vec<InteractionNode> {
    let mut items = nodes.to_vec();
    items.sort_by(|a, b| {
        by_created_at(
            (a.interaction.created_at, a.interaction.id.as_str()),
            (b.interaction.created_at, b.interaction.id.as_str()),
            true,
        )
    });
    items
}
