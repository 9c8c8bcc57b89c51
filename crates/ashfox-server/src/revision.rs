// crates/ashfox-server/src/revision.rs
// Content-hash revisions over project snapshots, plus the bounded store
// backing optimistic concurrency (ifRevision).

use ashfox_types::{Animation, Bone, Cube, ProjectSnapshot, Texture};
use std::collections::{HashMap, VecDeque};

/// Revisions kept for diffing / guard checks. Oldest entry is evicted
/// first (FIFO by first insert).
pub const REVISION_CACHE_CAPACITY: usize = 5;

/// Compute the revision of a snapshot.
///
/// The hash is a DJB2-style rolling 32-bit hash (`h = h.wrapping_mul(33) ^ byte`,
/// seed 5381) over the canonical structural JSON of the snapshot, rendered
/// as 8 lowercase hex digits. Revisions are visible to clients and compared
/// across processes, so both the canonical form and the hash are wire
/// contracts: do not change either.
pub fn hash_snapshot(snapshot: &ProjectSnapshot) -> String {
    let canonical = canonical_json(snapshot);
    format!("{:08x}", djb2(canonical.as_bytes()))
}

pub(crate) fn djb2(bytes: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for &b in bytes {
        h = h.wrapping_mul(33) ^ u32::from(b);
    }
    h
}

/// Canonical structural JSON of a snapshot.
///
/// Rules: object keys in the fixed order written below; arrays preserve
/// input order; missing optional fields serialize as `""`; floats use their
/// shortest round-trip representation (Rust's `Display` for `f64`).
/// Transient fields (`revision`, `dirty`, texture pixel data) are excluded.
pub fn canonical_json(s: &ProjectSnapshot) -> String {
    let mut out = String::with_capacity(1024);
    out.push('{');
    kv_str(&mut out, "id", &s.id);
    out.push(',');
    kv_str(&mut out, "name", &s.name);
    out.push(',');
    kv_opt_str(&mut out, "format", s.format.map(|f| f.as_str()));
    out.push(',');
    kv_opt_str(&mut out, "formatId", s.format_id.as_deref());
    out.push(',');
    key(&mut out, "resolution");
    match s.resolution {
        Some([w, h]) => out.push_str(&format!("[{w},{h}]")),
        None => out.push_str("\"\""),
    }
    out.push(',');
    key(&mut out, "uvPixelsPerBlock");
    match s.uv_pixels_per_block {
        Some(v) => push_f64(&mut out, v),
        None => out.push_str("\"\""),
    }
    out.push(',');
    key(&mut out, "bones");
    push_array(&mut out, &s.bones, push_bone);
    out.push(',');
    key(&mut out, "cubes");
    push_array(&mut out, &s.cubes, push_cube);
    out.push(',');
    key(&mut out, "textures");
    push_array(&mut out, &s.textures, push_texture);
    out.push(',');
    key(&mut out, "animations");
    push_array(&mut out, &s.animations, push_animation);
    out.push('}');
    out
}

fn push_bone(out: &mut String, b: &Bone) {
    out.push('{');
    kv_str(out, "id", &b.id);
    out.push(',');
    kv_str(out, "name", &b.name);
    out.push(',');
    kv_opt_str(out, "parent", b.parent.as_deref());
    out.push(',');
    key(out, "pivot");
    push_vec3(out, b.pivot);
    out.push(',');
    key(out, "rotation");
    push_opt_vec3(out, b.rotation);
    out.push(',');
    key(out, "scale");
    push_opt_vec3(out, b.scale);
    out.push(',');
    key(out, "visibility");
    out.push_str(if b.visibility { "true" } else { "false" });
    out.push('}');
}

fn push_cube(out: &mut String, c: &Cube) {
    out.push('{');
    kv_str(out, "id", &c.id);
    out.push(',');
    kv_str(out, "name", &c.name);
    out.push(',');
    kv_str(out, "bone", &c.bone);
    out.push(',');
    key(out, "from");
    push_vec3(out, c.from);
    out.push(',');
    key(out, "to");
    push_vec3(out, c.to);
    out.push(',');
    key(out, "origin");
    push_vec3(out, c.origin);
    out.push(',');
    key(out, "rotation");
    push_opt_vec3(out, c.rotation);
    out.push(',');
    key(out, "uvOffset");
    out.push('[');
    push_f64(out, c.uv_offset[0]);
    out.push(',');
    push_f64(out, c.uv_offset[1]);
    out.push(']');
    out.push(',');
    key(out, "boxUv");
    out.push_str(if c.box_uv { "true" } else { "false" });
    out.push(',');
    key(out, "inflate");
    push_f64(out, c.inflate);
    out.push(',');
    key(out, "mirror");
    out.push_str(if c.mirror { "true" } else { "false" });
    out.push(',');
    key(out, "faces");
    out.push('{');
    // BTreeMap iterates faces in declaration order; canonical by construction.
    let mut first = true;
    for (face, uv) in &c.faces {
        if !first {
            out.push(',');
        }
        first = false;
        key(out, face.as_str());
        out.push('{');
        key(out, "uv");
        out.push('[');
        for (i, v) in uv.uv.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            push_f64(out, *v);
        }
        out.push(']');
        out.push(',');
        kv_opt_str(out, "texture", uv.texture.as_deref());
        out.push('}');
    }
    out.push('}');
    out.push('}');
}

fn push_texture(out: &mut String, t: &Texture) {
    out.push('{');
    kv_str(out, "id", &t.id);
    out.push(',');
    kv_str(out, "name", &t.name);
    out.push(',');
    key(out, "width");
    out.push_str(&t.width.to_string());
    out.push(',');
    key(out, "height");
    out.push_str(&t.height.to_string());
    out.push(',');
    kv_opt_str(out, "path", t.path.as_deref());
    out.push(',');
    kv_opt_str(out, "contentHash", t.content_hash.as_deref());
    out.push('}');
}

fn push_animation(out: &mut String, a: &Animation) {
    out.push('{');
    kv_str(out, "id", &a.id);
    out.push(',');
    kv_str(out, "name", &a.name);
    out.push(',');
    key(out, "length");
    push_f64(out, a.length);
    out.push(',');
    key(out, "loop");
    out.push_str(if a.r#loop { "true" } else { "false" });
    out.push(',');
    key(out, "fps");
    push_f64(out, a.fps);
    out.push(',');
    key(out, "channels");
    out.push('{');
    let mut first = true;
    for (bone, ch) in &a.channels {
        if !first {
            out.push(',');
        }
        first = false;
        key_escaped(out, bone);
        out.push('{');
        for (i, (label, keys)) in [
            ("rotation", &ch.rotation),
            ("position", &ch.position),
            ("scale", &ch.scale),
        ]
        .into_iter()
        .enumerate()
        {
            if i > 0 {
                out.push(',');
            }
            key(out, label);
            out.push('[');
            for (j, k) in keys.iter().enumerate() {
                if j > 0 {
                    out.push(',');
                }
                out.push('{');
                key(out, "time");
                push_f64(out, k.time);
                out.push(',');
                key(out, "value");
                push_vec3(out, k.value);
                out.push(',');
                kv_opt_str(out, "interpolation", k.interpolation.as_deref());
                out.push('}');
            }
            out.push(']');
        }
        out.push('}');
    }
    out.push('}');
    out.push(',');
    key(out, "triggers");
    out.push('{');
    let mut first = true;
    for (channel, keys) in &a.triggers {
        if !first {
            out.push(',');
        }
        first = false;
        key_escaped(out, channel);
        out.push('[');
        for (j, k) in keys.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            out.push('{');
            key(out, "time");
            push_f64(out, k.time);
            out.push(',');
            kv_str(out, "value", &k.value);
            out.push('}');
        }
        out.push(']');
    }
    out.push('}');
    out.push('}');
}

fn push_array<T>(out: &mut String, items: &[T], f: impl Fn(&mut String, &T)) {
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        f(out, item);
    }
    out.push(']');
}

fn push_vec3(out: &mut String, v: [f64; 3]) {
    out.push('[');
    push_f64(out, v[0]);
    out.push(',');
    push_f64(out, v[1]);
    out.push(',');
    push_f64(out, v[2]);
    out.push(']');
}

fn push_opt_vec3(out: &mut String, v: Option<[f64; 3]>) {
    match v {
        Some(v) => push_vec3(out, v),
        None => out.push_str("\"\""),
    }
}

fn push_f64(out: &mut String, v: f64) {
    // f64 Display is the shortest decimal that round-trips.
    out.push_str(&v.to_string());
}

fn key(out: &mut String, name: &str) {
    out.push('"');
    out.push_str(name);
    out.push_str("\":");
}

fn key_escaped(out: &mut String, name: &str) {
    out.push_str(&escape(name));
    out.push(':');
}

fn kv_str(out: &mut String, name: &str, value: &str) {
    key(out, name);
    out.push_str(&escape(value));
}

fn kv_opt_str(out: &mut String, name: &str, value: Option<&str>) {
    key(out, name);
    out.push_str(&escape(value.unwrap_or("")));
}

fn escape(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Bounded map of revision → snapshot, evicting FIFO by first insert.
///
/// Single-owner: the tool service holds it behind its own lock. Re-tracking
/// an already-known revision refreshes the stored snapshot without changing
/// its eviction position.
#[derive(Debug, Default)]
pub struct RevisionStore {
    order: VecDeque<String>,
    entries: HashMap<String, ProjectSnapshot>,
}

impl RevisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash the snapshot, remember it, and return its revision.
    pub fn track(&mut self, snapshot: &ProjectSnapshot) -> String {
        let revision = hash_snapshot(snapshot);
        if self.entries.insert(revision.clone(), snapshot.clone()).is_none() {
            self.order.push_back(revision.clone());
            while self.order.len() > REVISION_CACHE_CAPACITY {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
        revision
    }

    /// Deep-cloned snapshot for a tracked revision, if still retained.
    pub fn get(&self, revision: &str) -> Option<ProjectSnapshot> {
        self.entries.get(revision).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
