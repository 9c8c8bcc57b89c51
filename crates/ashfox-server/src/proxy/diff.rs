// crates/ashfox-server/src/proxy/diff.rs
// Entity-level diff between two snapshots, attached to proxy responses on
// request. Entities are matched by name within their kind.

use ashfox_types::ProjectSnapshot;
use serde_json::{Value, json};
use std::collections::BTreeMap;

fn diff_kind<T, F>(before: &[T], after: &[T], name_of: F) -> Value
where
    T: PartialEq,
    F: Fn(&T) -> &str,
{
    let before_by_name: BTreeMap<&str, &T> = before.iter().map(|e| (name_of(e), e)).collect();
    let after_by_name: BTreeMap<&str, &T> = after.iter().map(|e| (name_of(e), e)).collect();

    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut changed = Vec::new();
    for (name, entity) in &after_by_name {
        match before_by_name.get(name) {
            None => added.push(*name),
            Some(prior) if *prior != *entity => changed.push(*name),
            Some(_) => {}
        }
    }
    for name in before_by_name.keys() {
        if !after_by_name.contains_key(name) {
            removed.push(*name);
        }
    }
    json!({ "added": added, "removed": removed, "changed": changed })
}

/// Diff `before` → `after`. The transient `revision`/`dirty` fields do not
/// participate.
pub fn compute_diff(before: &ProjectSnapshot, after: &ProjectSnapshot) -> Value {
    json!({
        "fromRevision": before.revision,
        "bones": diff_kind(&before.bones, &after.bones, |b| b.name.as_str()),
        "cubes": diff_kind(&before.cubes, &after.cubes, |c| c.name.as_str()),
        "textures": diff_kind(&before.textures, &after.textures, |t| t.name.as_str()),
        "animations": diff_kind(&before.animations, &after.animations, |a| a.name.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ashfox_types::Bone;

    fn bone(name: &str, pivot: [f64; 3]) -> Bone {
        Bone {
            id: format!("id_{name}"),
            name: name.to_string(),
            parent: None,
            pivot,
            rotation: None,
            scale: None,
            visibility: true,
        }
    }

    #[test]
    fn reports_added_removed_changed() {
        let mut before = ProjectSnapshot::empty("p", "fox");
        before.bones.push(bone("root", [0.0; 3]));
        before.bones.push(bone("tail", [0.0; 3]));

        let mut after = ProjectSnapshot::empty("p", "fox");
        after.bones.push(bone("root", [1.0, 0.0, 0.0]));
        after.bones.push(bone("head", [0.0; 3]));

        let diff = compute_diff(&before, &after);
        assert_eq!(diff["bones"]["added"][0], "head");
        assert_eq!(diff["bones"]["removed"][0], "tail");
        assert_eq!(diff["bones"]["changed"][0], "root");
        assert!(diff["cubes"]["added"].as_array().unwrap().is_empty());
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let mut snapshot = ProjectSnapshot::empty("p", "fox");
        snapshot.bones.push(bone("root", [0.0; 3]));
        let diff = compute_diff(&snapshot, &snapshot.clone());
        for kind in ["bones", "cubes", "textures", "animations"] {
            for bucket in ["added", "removed", "changed"] {
                assert!(diff[kind][bucket].as_array().unwrap().is_empty());
            }
        }
    }
}
