// crates/ashfox-server/src/merge.rs
// Fuses the gateway's session snapshot with a live editor snapshot and
// normalizes the model format.

use ashfox_types::{
    Animation, AnimationsStatus, FormatKind, LiveSnapshot, ProjectSnapshot, Texture,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which source wins when session and live state disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Ignore live state entirely.
    Session,
    /// Live state wins; session only fills identity gaps.
    Live,
    /// Live wins for geometry and identity, session fills texture metadata
    /// and animation detail the editor could not report.
    #[default]
    Hybrid,
}

/// Merge configuration: the policy plus the format-id override table used
/// during normalization.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub policy: MergePolicy,
    /// formatId → kind, for hosts whose format ids carry no recognizable
    /// substring.
    pub format_overrides: HashMap<String, FormatKind>,
}

/// Produce the canonical snapshot for the current request.
///
/// `session` is the authoritative mutable model; `live` is whatever the
/// editor adapter could read. The result is always format-normalized.
pub fn merge_snapshots(
    session: &ProjectSnapshot,
    live: Option<&LiveSnapshot>,
    opts: &MergeOptions,
) -> ProjectSnapshot {
    let mut merged = match (opts.policy, live) {
        (MergePolicy::Session, _) | (_, None) => session.clone(),
        (MergePolicy::Live, Some(live)) => {
            let mut out = live.snapshot.clone();
            fill_identity(&mut out, session);
            out
        }
        (MergePolicy::Hybrid, Some(live)) => hybrid(session, live),
    };
    normalize_format(&mut merged, &opts.format_overrides);
    merged.revision = None;
    merged
}

fn hybrid(session: &ProjectSnapshot, live: &LiveSnapshot) -> ProjectSnapshot {
    let mut out = live.snapshot.clone();
    fill_identity(&mut out, session);

    if out.resolution.is_none() {
        out.resolution = session.resolution;
    }
    if out.uv_pixels_per_block.is_none() {
        out.uv_pixels_per_block = session.uv_pixels_per_block;
    }

    // Live's texture list is the truth for which textures exist, but the
    // editor often cannot report path/size/hash; recover those from the
    // session entry with the same id or name.
    for texture in &mut out.textures {
        if let Some(prior) = find_texture(session, texture) {
            if texture.path.is_none() {
                texture.path = prior.path.clone();
            }
            if texture.width == 0 && texture.height == 0 {
                texture.width = prior.width;
                texture.height = prior.height;
            }
            if texture.content_hash.is_none() {
                texture.content_hash = prior.content_hash.clone();
            }
        }
    }

    if live.animations_status == AnimationsStatus::Unavailable {
        out.animations = session.animations.clone();
    } else {
        for animation in &mut out.animations {
            if let Some(prior) = find_animation(session, animation) {
                if animation.fps <= 0.0 {
                    animation.fps = prior.fps;
                }
                if animation.channels.is_empty() {
                    animation.channels = prior.channels.clone();
                }
                if animation.triggers.is_empty() {
                    animation.triggers = prior.triggers.clone();
                }
            }
        }
    }

    out
}

fn fill_identity(out: &mut ProjectSnapshot, session: &ProjectSnapshot) {
    if out.name.is_empty() {
        out.name = session.name.clone();
    }
    if out.format.is_none() {
        out.format = session.format;
    }
    if out.format_id.is_none() {
        out.format_id = session.format_id.clone();
    }
}

fn find_texture<'a>(session: &'a ProjectSnapshot, live: &Texture) -> Option<&'a Texture> {
    session
        .textures
        .iter()
        .find(|t| t.id == live.id)
        .or_else(|| session.textures.iter().find(|t| t.name == live.name))
}

fn find_animation<'a>(session: &'a ProjectSnapshot, live: &Animation) -> Option<&'a Animation> {
    session
        .animations
        .iter()
        .find(|a| a.id == live.id)
        .or_else(|| session.animations.iter().find(|a| a.name == live.name))
}

/// Derive the format kind when only a formatId is known: the override table
/// first, then substring matching against the known kinds.
pub fn normalize_format(snapshot: &mut ProjectSnapshot, overrides: &HashMap<String, FormatKind>) {
    if snapshot.format.is_some() {
        return;
    }
    let Some(format_id) = snapshot.format_id.as_deref() else {
        return;
    };
    if let Some(kind) = overrides.get(format_id) {
        snapshot.format = Some(*kind);
        return;
    }
    let lowered = format_id.to_ascii_lowercase();
    snapshot.format = FormatKind::ALL
        .into_iter()
        .find(|kind| lowered.contains(kind.as_str()));
}
