// crates/ashfox-server/src/session.rs
// In-memory mutable project model. All entity CRUD flows through here so
// the §3 invariants (unique names/ids, valid references, ordered UV rects)
// hold after every operation.

use crate::error::ToolError;
use ashfox_types::{
    Animation, Bone, BoneChannels, Cube, CubeFace, FaceUv, Keyframe, ProjectSnapshot, Texture,
    TriggerKeyframe,
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Parameters for a new bone. Ids are assigned by the session.
#[derive(Debug, Clone, Default)]
pub struct NewBone {
    pub name: String,
    pub parent: Option<String>,
    pub pivot: [f64; 3],
    pub rotation: Option<[f64; 3]>,
    pub scale: Option<[f64; 3]>,
    pub visibility: Option<bool>,
}

/// Field-wise bone update. `None` leaves the field alone; the nested
/// options distinguish "clear" from "keep".
#[derive(Debug, Clone, Default)]
pub struct BonePatch {
    pub name: Option<String>,
    pub parent: Option<Option<String>>,
    pub pivot: Option<[f64; 3]>,
    pub rotation: Option<Option<[f64; 3]>>,
    pub scale: Option<Option<[f64; 3]>>,
    pub visibility: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct NewCube {
    pub name: String,
    pub bone: String,
    pub from: [f64; 3],
    pub to: [f64; 3],
    pub origin: Option<[f64; 3]>,
    pub rotation: Option<[f64; 3]>,
    pub uv_offset: Option<[f64; 2]>,
    pub box_uv: bool,
    pub inflate: Option<f64>,
    pub mirror: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CubePatch {
    pub name: Option<String>,
    pub bone: Option<String>,
    pub from: Option<[f64; 3]>,
    pub to: Option<[f64; 3]>,
    pub origin: Option<[f64; 3]>,
    pub rotation: Option<Option<[f64; 3]>>,
    pub uv_offset: Option<[f64; 2]>,
    pub box_uv: Option<bool>,
    pub inflate: Option<f64>,
    pub mirror: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTexture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub path: Option<String>,
    pub content_hash: Option<String>,
    pub data_uri: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAnimation {
    pub name: String,
    pub length: f64,
    pub r#loop: bool,
    pub fps: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AnimationPatch {
    pub name: Option<String>,
    pub length: Option<f64>,
    pub r#loop: Option<bool>,
    pub fps: Option<f64>,
}

/// Transform values for one bone at one point in time.
#[derive(Debug, Clone, Default)]
pub struct BonePose {
    pub rotation: Option<[f64; 3]>,
    pub position: Option<[f64; 3]>,
    pub scale: Option<[f64; 3]>,
}

/// Owns the authoritative snapshot for the active project.
#[derive(Debug)]
pub struct ProjectSession {
    snapshot: ProjectSnapshot,
}

impl ProjectSession {
    pub fn new(snapshot: ProjectSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &ProjectSnapshot {
        &self.snapshot
    }

    pub fn snapshot_cloned(&self) -> ProjectSnapshot {
        self.snapshot.clone()
    }

    /// Replace the whole snapshot (project attach / live adoption).
    pub fn replace(&mut self, snapshot: ProjectSnapshot) {
        self.snapshot = snapshot;
    }

    pub fn mark_clean(&mut self) {
        self.snapshot.dirty = false;
    }

    fn touch(&mut self) {
        self.snapshot.dirty = true;
    }

    /// Name → index over bones, rebuilt from the snapshot. Bones reference
    /// parents by name; there is no pointer graph to keep consistent.
    pub fn bone_index(&self) -> HashMap<&str, usize> {
        self.snapshot
            .bones
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name.as_str(), i))
            .collect()
    }

    // ---------------------------------------------------------------
    // Bones
    // ---------------------------------------------------------------

    pub fn add_bone(&mut self, new: NewBone) -> Result<&Bone, ToolError> {
        if new.name.is_empty() {
            return Err(ToolError::invalid_payload("bone name must not be empty"));
        }
        if let Some(existing) = self.snapshot.bones.iter().find(|b| b.name == new.name) {
            // An identical re-add is a no-op, not a conflict.
            if existing.parent == new.parent
                && existing.pivot == new.pivot
                && existing.rotation == new.rotation
                && existing.scale == new.scale
                && existing.visibility == new.visibility.unwrap_or(true)
            {
                return Err(ToolError::no_change("bone_already_present"));
            }
            return Err(ToolError::invalid_payload(format!(
                "bone name '{}' is already taken",
                new.name
            )));
        }
        if let Some(parent) = &new.parent {
            if !self.snapshot.bones.iter().any(|b| &b.name == parent) {
                return Err(ToolError::invalid_payload(format!(
                    "parent bone '{parent}' does not exist"
                )));
            }
        }
        let bone = Bone {
            id: next_id("bone"),
            name: new.name,
            parent: new.parent,
            pivot: new.pivot,
            rotation: new.rotation,
            scale: new.scale,
            visibility: new.visibility.unwrap_or(true),
        };
        self.snapshot.bones.push(bone);
        self.touch();
        Ok(self.snapshot.bones.last().unwrap_or_else(|| unreachable!()))
    }

    pub fn update_bone(&mut self, name: &str, patch: BonePatch) -> Result<bool, ToolError> {
        let idx = self
            .snapshot
            .bones
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| bone_not_found(name))?;

        if let Some(new_name) = &patch.name {
            if new_name != name && self.snapshot.bones.iter().any(|b| &b.name == new_name) {
                return Err(ToolError::invalid_payload(format!(
                    "bone name '{new_name}' is already taken"
                )));
            }
        }
        if let Some(Some(parent)) = &patch.parent {
            if parent == name {
                return Err(ToolError::invalid_payload("bone cannot be its own parent"));
            }
            if !self.snapshot.bones.iter().any(|b| &b.name == parent) {
                return Err(ToolError::invalid_payload(format!(
                    "parent bone '{parent}' does not exist"
                )));
            }
        }

        let before = self.snapshot.bones[idx].clone();
        let bone = &mut self.snapshot.bones[idx];
        if let Some(v) = patch.name.clone() {
            bone.name = v;
        }
        if let Some(v) = patch.parent {
            bone.parent = v;
        }
        if let Some(v) = patch.pivot {
            bone.pivot = v;
        }
        if let Some(v) = patch.rotation {
            bone.rotation = v;
        }
        if let Some(v) = patch.scale {
            bone.scale = v;
        }
        if let Some(v) = patch.visibility {
            bone.visibility = v;
        }
        let changed = *bone != before;

        if changed {
            // Renames cascade to children, cubes, and animation channels.
            if let Some(new_name) = &patch.name {
                if new_name != name {
                    let new_name = new_name.clone();
                    for b in &mut self.snapshot.bones {
                        if b.parent.as_deref() == Some(name) {
                            b.parent = Some(new_name.clone());
                        }
                    }
                    for c in &mut self.snapshot.cubes {
                        if c.bone == name {
                            c.bone = new_name.clone();
                        }
                    }
                    for a in &mut self.snapshot.animations {
                        if let Some(channels) = a.channels.remove(name) {
                            a.channels.insert(new_name.clone(), channels);
                        }
                    }
                }
            }
            self.touch();
        }
        Ok(changed)
    }

    pub fn delete_bone(&mut self, name: &str) -> Result<(), ToolError> {
        let idx = self
            .snapshot
            .bones
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| bone_not_found(name))?;
        if self
            .snapshot
            .bones
            .iter()
            .any(|b| b.parent.as_deref() == Some(name))
        {
            return Err(ToolError::invalid_state(
                "bone_in_use",
                format!("bone '{name}' still has child bones"),
            ));
        }
        if self.snapshot.cubes.iter().any(|c| c.bone == name) {
            return Err(ToolError::invalid_state(
                "bone_in_use",
                format!("bone '{name}' still has cubes attached"),
            ));
        }
        self.snapshot.bones.remove(idx);
        for a in &mut self.snapshot.animations {
            a.channels.remove(name);
        }
        self.touch();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Cubes
    // ---------------------------------------------------------------

    pub fn add_cube(&mut self, new: NewCube) -> Result<&Cube, ToolError> {
        if new.name.is_empty() {
            return Err(ToolError::invalid_payload("cube name must not be empty"));
        }
        if self.snapshot.cubes.iter().any(|c| c.name == new.name) {
            return Err(ToolError::invalid_payload(format!(
                "cube name '{}' is already taken",
                new.name
            )));
        }
        if !self.snapshot.bones.iter().any(|b| b.name == new.bone) {
            return Err(ToolError::invalid_payload(format!(
                "bone '{}' does not exist",
                new.bone
            )));
        }
        for axis in 0..3 {
            if new.from[axis] > new.to[axis] {
                return Err(ToolError::invalid_payload(
                    "cube 'from' must not exceed 'to' on any axis",
                ));
            }
        }
        let cube = Cube {
            id: next_id("cube"),
            name: new.name,
            bone: new.bone,
            from: new.from,
            to: new.to,
            origin: new.origin.unwrap_or(new.from),
            rotation: new.rotation,
            uv_offset: new.uv_offset.unwrap_or([0.0, 0.0]),
            box_uv: new.box_uv,
            inflate: new.inflate.unwrap_or(0.0),
            mirror: new.mirror,
            faces: BTreeMap::new(),
        };
        self.snapshot.cubes.push(cube);
        self.touch();
        Ok(self.snapshot.cubes.last().unwrap_or_else(|| unreachable!()))
    }

    pub fn update_cube(&mut self, name: &str, patch: CubePatch) -> Result<bool, ToolError> {
        let idx = self
            .snapshot
            .cubes
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| cube_not_found(name))?;

        if let Some(new_name) = &patch.name {
            if new_name != name && self.snapshot.cubes.iter().any(|c| &c.name == new_name) {
                return Err(ToolError::invalid_payload(format!(
                    "cube name '{new_name}' is already taken"
                )));
            }
        }
        if let Some(bone) = &patch.bone {
            if !self.snapshot.bones.iter().any(|b| &b.name == bone) {
                return Err(ToolError::invalid_payload(format!(
                    "bone '{bone}' does not exist"
                )));
            }
        }

        let before = self.snapshot.cubes[idx].clone();
        let cube = &mut self.snapshot.cubes[idx];
        if let Some(v) = patch.name {
            cube.name = v;
        }
        if let Some(v) = patch.bone {
            cube.bone = v;
        }
        if let Some(v) = patch.from {
            cube.from = v;
        }
        if let Some(v) = patch.to {
            cube.to = v;
        }
        if let Some(v) = patch.origin {
            cube.origin = v;
        }
        if let Some(v) = patch.rotation {
            cube.rotation = v;
        }
        if let Some(v) = patch.uv_offset {
            cube.uv_offset = v;
        }
        if let Some(v) = patch.box_uv {
            cube.box_uv = v;
        }
        if let Some(v) = patch.inflate {
            cube.inflate = v;
        }
        if let Some(v) = patch.mirror {
            cube.mirror = v;
        }
        for axis in 0..3 {
            if cube.from[axis] > cube.to[axis] {
                self.snapshot.cubes[idx] = before;
                return Err(ToolError::invalid_payload(
                    "cube 'from' must not exceed 'to' on any axis",
                ));
            }
        }
        let changed = self.snapshot.cubes[idx] != before;
        if changed {
            self.touch();
        }
        Ok(changed)
    }

    pub fn delete_cube(&mut self, name: &str) -> Result<(), ToolError> {
        let idx = self
            .snapshot
            .cubes
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| cube_not_found(name))?;
        self.snapshot.cubes.remove(idx);
        self.touch();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Textures
    // ---------------------------------------------------------------

    pub fn add_texture(&mut self, new: NewTexture) -> Result<&Texture, ToolError> {
        if new.name.is_empty() {
            return Err(ToolError::invalid_payload("texture name must not be empty"));
        }
        if new.width == 0 || new.height == 0 {
            return Err(ToolError::invalid_payload(
                "texture dimensions must be positive",
            ));
        }
        if self.snapshot.textures.iter().any(|t| t.name == new.name) {
            return Err(ToolError::invalid_payload(format!(
                "texture name '{}' is already taken",
                new.name
            )));
        }
        let texture = Texture {
            id: next_id("tex"),
            name: new.name,
            width: new.width,
            height: new.height,
            path: new.path,
            content_hash: new.content_hash,
            data_uri: new.data_uri,
        };
        self.snapshot.textures.push(texture);
        self.touch();
        Ok(self
            .snapshot
            .textures
            .last()
            .unwrap_or_else(|| unreachable!()))
    }

    pub fn update_texture(&mut self, id_or_name: &str, new: NewTexture) -> Result<bool, ToolError> {
        if new.width == 0 || new.height == 0 {
            return Err(ToolError::invalid_payload(
                "texture dimensions must be positive",
            ));
        }
        let idx = self
            .texture_position(id_or_name)
            .ok_or_else(|| texture_not_found(id_or_name))?;
        if !new.name.is_empty()
            && new.name != self.snapshot.textures[idx].name
            && self.snapshot.textures.iter().any(|t| t.name == new.name)
        {
            return Err(ToolError::invalid_payload(format!(
                "texture name '{}' is already taken",
                new.name
            )));
        }
        let before = self.snapshot.textures[idx].clone();
        let tex = &mut self.snapshot.textures[idx];
        if !new.name.is_empty() {
            tex.name = new.name;
        }
        tex.width = new.width;
        tex.height = new.height;
        if new.path.is_some() {
            tex.path = new.path;
        }
        if new.content_hash.is_some() {
            tex.content_hash = new.content_hash;
        }
        if new.data_uri.is_some() {
            tex.data_uri = new.data_uri;
        }
        let changed = self.snapshot.textures[idx] != before;
        if changed {
            self.touch();
        }
        Ok(changed)
    }

    pub fn delete_texture(&mut self, id_or_name: &str) -> Result<(), ToolError> {
        let idx = self
            .texture_position(id_or_name)
            .ok_or_else(|| texture_not_found(id_or_name))?;
        let id = self.snapshot.textures[idx].id.clone();
        self.snapshot.textures.remove(idx);
        for cube in &mut self.snapshot.cubes {
            for face in cube.faces.values_mut() {
                if face.texture.as_deref() == Some(id.as_str()) {
                    face.texture = None;
                }
            }
        }
        self.touch();
        Ok(())
    }

    pub fn texture_position(&self, id_or_name: &str) -> Option<usize> {
        self.snapshot
            .textures
            .iter()
            .position(|t| t.id == id_or_name)
            .or_else(|| {
                self.snapshot
                    .textures
                    .iter()
                    .position(|t| t.name == id_or_name)
            })
    }

    pub fn find_texture(&self, id_or_name: &str) -> Option<&Texture> {
        self.texture_position(id_or_name)
            .map(|i| &self.snapshot.textures[i])
    }

    /// Point faces at a texture, keeping existing UV rects. Faces that had
    /// no UV yet get the full texture rect. Returns how many faces changed.
    pub fn assign_texture(
        &mut self,
        id_or_name: &str,
        cubes: Option<&[String]>,
        faces: &[CubeFace],
    ) -> Result<usize, ToolError> {
        let texture = self
            .find_texture(id_or_name)
            .ok_or_else(|| texture_not_found(id_or_name))?;
        let texture_id = texture.id.clone();
        let full_rect = [0.0, 0.0, f64::from(texture.width), f64::from(texture.height)];

        if let Some(names) = cubes {
            for name in names {
                if !self.snapshot.cubes.iter().any(|c| &c.name == name) {
                    return Err(cube_not_found(name));
                }
            }
        }

        let mut changed = 0;
        for cube in &mut self.snapshot.cubes {
            if let Some(names) = cubes {
                if !names.iter().any(|n| n == &cube.name) {
                    continue;
                }
            }
            for face in faces {
                match cube.faces.get_mut(face) {
                    Some(existing) => {
                        if existing.texture.as_deref() != Some(texture_id.as_str()) {
                            existing.texture = Some(texture_id.clone());
                            changed += 1;
                        }
                    }
                    None => {
                        cube.faces.insert(
                            *face,
                            FaceUv {
                                uv: full_rect,
                                texture: Some(texture_id.clone()),
                            },
                        );
                        changed += 1;
                    }
                }
            }
        }
        if changed > 0 {
            self.touch();
        }
        Ok(changed)
    }

    // ---------------------------------------------------------------
    // Face UV
    // ---------------------------------------------------------------

    /// Set one face's UV rect (and optionally its texture). The rect must
    /// be ordered and lie inside the target texture's resolution.
    pub fn set_face_uv(
        &mut self,
        cube_name: &str,
        face: CubeFace,
        uv: [f64; 4],
        texture: Option<String>,
    ) -> Result<bool, ToolError> {
        let cube_idx = self
            .snapshot
            .cubes
            .iter()
            .position(|c| c.name == cube_name)
            .ok_or_else(|| cube_not_found(cube_name))?;

        if uv[0] > uv[2] || uv[1] > uv[3] {
            return Err(ToolError::invalid_payload(
                "UV rect must be ordered: x1 <= x2 and y1 <= y2",
            ));
        }

        let texture_id = match &texture {
            Some(id_or_name) => Some(
                self.find_texture(id_or_name)
                    .ok_or_else(|| texture_not_found(id_or_name))?
                    .id
                    .clone(),
            ),
            None => self.snapshot.cubes[cube_idx]
                .faces
                .get(&face)
                .and_then(|f| f.texture.clone()),
        };

        let bounds = texture_id
            .as_deref()
            .and_then(|id| self.snapshot.textures.iter().find(|t| t.id == id))
            .map(|t| (f64::from(t.width), f64::from(t.height)))
            .or_else(|| {
                self.snapshot
                    .resolution
                    .map(|[w, h]| (f64::from(w), f64::from(h)))
            });
        if let Some((w, h)) = bounds {
            if uv[0] < 0.0 || uv[1] < 0.0 || uv[2] > w || uv[3] > h {
                return Err(ToolError::invalid_payload(format!(
                    "UV rect [{}, {}, {}, {}] exceeds texture resolution {w}x{h}",
                    uv[0], uv[1], uv[2], uv[3]
                )));
            }
        }

        let cube = &mut self.snapshot.cubes[cube_idx];
        let next = FaceUv {
            uv,
            texture: texture_id,
        };
        let changed = cube.faces.get(&face) != Some(&next);
        if changed {
            cube.faces.insert(face, next);
            self.touch();
        }
        Ok(changed)
    }

    // ---------------------------------------------------------------
    // Animations
    // ---------------------------------------------------------------

    pub fn add_animation(&mut self, new: NewAnimation) -> Result<&Animation, ToolError> {
        if new.name.is_empty() {
            return Err(ToolError::invalid_payload(
                "animation name must not be empty",
            ));
        }
        if new.length < 0.0 {
            return Err(ToolError::invalid_payload(
                "animation length must be >= 0",
            ));
        }
        if new.fps <= 0.0 {
            return Err(ToolError::invalid_payload("animation fps must be > 0"));
        }
        if self.snapshot.animations.iter().any(|a| a.name == new.name) {
            return Err(ToolError::invalid_payload(format!(
                "animation name '{}' is already taken",
                new.name
            )));
        }
        let animation = Animation {
            id: next_id("anim"),
            name: new.name,
            length: new.length,
            r#loop: new.r#loop,
            fps: new.fps,
            channels: BTreeMap::new(),
            triggers: BTreeMap::new(),
        };
        self.snapshot.animations.push(animation);
        self.touch();
        Ok(self
            .snapshot
            .animations
            .last()
            .unwrap_or_else(|| unreachable!()))
    }

    pub fn update_animation(
        &mut self,
        name: &str,
        patch: AnimationPatch,
    ) -> Result<bool, ToolError> {
        let idx = self
            .snapshot
            .animations
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| animation_not_found(name))?;
        if let Some(new_name) = &patch.name {
            if new_name != name
                && self
                    .snapshot
                    .animations
                    .iter()
                    .any(|a| &a.name == new_name)
            {
                return Err(ToolError::invalid_payload(format!(
                    "animation name '{new_name}' is already taken"
                )));
            }
        }
        if let Some(length) = patch.length {
            if length < 0.0 {
                return Err(ToolError::invalid_payload(
                    "animation length must be >= 0",
                ));
            }
        }
        if let Some(fps) = patch.fps {
            if fps <= 0.0 {
                return Err(ToolError::invalid_payload("animation fps must be > 0"));
            }
        }
        let before = self.snapshot.animations[idx].clone();
        let anim = &mut self.snapshot.animations[idx];
        if let Some(v) = patch.name {
            anim.name = v;
        }
        if let Some(v) = patch.length {
            anim.length = v;
        }
        if let Some(v) = patch.r#loop {
            anim.r#loop = v;
        }
        if let Some(v) = patch.fps {
            anim.fps = v;
        }
        let changed = self.snapshot.animations[idx] != before;
        if changed {
            self.touch();
        }
        Ok(changed)
    }

    pub fn delete_animation(&mut self, name: &str) -> Result<(), ToolError> {
        let idx = self
            .snapshot
            .animations
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| animation_not_found(name))?;
        self.snapshot.animations.remove(idx);
        self.touch();
        Ok(())
    }

    /// Write keyframes for several bones at a single point in time.
    pub fn set_frame_pose(
        &mut self,
        animation: &str,
        time: f64,
        poses: &HashMap<String, BonePose>,
    ) -> Result<bool, ToolError> {
        if time < 0.0 {
            return Err(ToolError::invalid_payload("keyframe time must be >= 0"));
        }
        let bone_names: HashSet<&str> = self.snapshot.bones.iter().map(|b| b.name.as_str()).collect();
        for bone in poses.keys() {
            if !bone_names.contains(bone.as_str()) {
                return Err(ToolError::invalid_payload(format!(
                    "bone '{bone}' does not exist"
                )));
            }
        }
        let idx = self
            .snapshot
            .animations
            .iter()
            .position(|a| a.name == animation)
            .ok_or_else(|| animation_not_found(animation))?;

        let anim = &mut self.snapshot.animations[idx];
        let mut changed = false;
        for (bone, pose) in poses {
            let channels = anim.channels.entry(bone.clone()).or_insert_with(BoneChannels::default);
            for (track, value) in [
                (&mut channels.rotation, pose.rotation),
                (&mut channels.position, pose.position),
                (&mut channels.scale, pose.scale),
            ] {
                let Some(value) = value else { continue };
                changed |= upsert_keyframe(track, time, value);
            }
        }
        if anim.length < time {
            anim.length = time;
            changed = true;
        }
        if changed {
            self.touch();
        }
        Ok(changed)
    }

    /// Replace the trigger keys of one trigger channel.
    pub fn set_triggers(
        &mut self,
        animation: &str,
        channel: &str,
        mut keys: Vec<TriggerKeyframe>,
    ) -> Result<bool, ToolError> {
        if keys.iter().any(|k| k.time < 0.0) {
            return Err(ToolError::invalid_payload("trigger time must be >= 0"));
        }
        let idx = self
            .snapshot
            .animations
            .iter()
            .position(|a| a.name == animation)
            .ok_or_else(|| animation_not_found(animation))?;
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        let anim = &mut self.snapshot.animations[idx];
        let changed = anim.triggers.get(channel).map(Vec::as_slice) != Some(keys.as_slice());
        if changed {
            if keys.is_empty() {
                anim.triggers.remove(channel);
            } else {
                anim.triggers.insert(channel.to_string(), keys);
            }
            self.touch();
        }
        Ok(changed)
    }

    // ---------------------------------------------------------------
    // Project-level settings
    // ---------------------------------------------------------------

    pub fn set_resolution(&mut self, width: u32, height: u32) -> Result<bool, ToolError> {
        if width == 0 || height == 0 {
            return Err(ToolError::invalid_payload(
                "texture resolution must be positive",
            ));
        }
        let next = Some([width, height]);
        let changed = self.snapshot.resolution != next;
        if changed {
            self.snapshot.resolution = next;
            self.touch();
        }
        Ok(changed)
    }

    pub fn set_uv_pixels_per_block(&mut self, value: f64) -> Result<bool, ToolError> {
        if value <= 0.0 {
            return Err(ToolError::invalid_payload(
                "uv pixels-per-block must be > 0",
            ));
        }
        let next = Some(value);
        let changed = self.snapshot.uv_pixels_per_block != next;
        if changed {
            self.snapshot.uv_pixels_per_block = next;
            self.touch();
        }
        Ok(changed)
    }
}

/// Insert or overwrite the keyframe at `time` on one track, keeping the
/// track sorted by time.
fn upsert_keyframe(track: &mut Vec<Keyframe>, time: f64, value: [f64; 3]) -> bool {
    if let Some(existing) = track.iter_mut().find(|k| k.time == time) {
        if existing.value == value {
            return false;
        }
        existing.value = value;
        return true;
    }
    track.push(Keyframe {
        time,
        value,
        interpolation: None,
    });
    track.sort_by(|a, b| a.time.total_cmp(&b.time));
    true
}

fn next_id(prefix: &str) -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &raw[..8])
}

fn bone_not_found(name: &str) -> ToolError {
    ToolError::invalid_payload(format!("bone '{name}' does not exist"))
}

fn cube_not_found(name: &str) -> ToolError {
    ToolError::invalid_payload(format!("cube '{name}' does not exist"))
}

fn texture_not_found(name: &str) -> ToolError {
    ToolError::invalid_payload(format!("texture '{name}' does not exist"))
}

fn animation_not_found(name: &str) -> ToolError {
    ToolError::invalid_payload(format!("animation '{name}' does not exist"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn session_with_root() -> ProjectSession {
        let mut session = ProjectSession::new(ProjectSnapshot::empty("p1", "fox"));
        session
            .add_bone(NewBone {
                name: "root".into(),
                ..Default::default()
            })
            .unwrap();
        session.mark_clean();
        session
    }

    #[test]
    fn add_bone_rejects_unknown_parent() {
        let mut session = session_with_root();
        let err = session
            .add_bone(NewBone {
                name: "arm".into(),
                parent: Some("torso".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPayload);
    }

    #[test]
    fn identical_re_add_is_no_change() {
        let mut session = session_with_root();
        let err = session
            .add_bone(NewBone {
                name: "root".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NoChange);
        assert_eq!(err.reason(), Some("bone_already_present"));
    }

    #[test]
    fn conflicting_re_add_is_rejected() {
        let mut session = session_with_root();
        let err = session
            .add_bone(NewBone {
                name: "root".into(),
                pivot: [1.0, 0.0, 0.0],
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPayload);
    }

    #[test]
    fn bone_rename_cascades() {
        let mut session = session_with_root();
        session
            .add_bone(NewBone {
                name: "arm".into(),
                parent: Some("root".into()),
                ..Default::default()
            })
            .unwrap();
        session
            .add_cube(NewCube {
                name: "body".into(),
                bone: "root".into(),
                from: [0.0; 3],
                to: [4.0, 4.0, 4.0],
                ..Default::default()
            })
            .unwrap();
        session
            .add_animation(NewAnimation {
                name: "walk".into(),
                length: 1.0,
                fps: 20.0,
                r#loop: false,
            })
            .unwrap();
        let mut poses = HashMap::new();
        poses.insert(
            "root".to_string(),
            BonePose {
                rotation: Some([0.0, 45.0, 0.0]),
                ..Default::default()
            },
        );
        session.set_frame_pose("walk", 0.0, &poses).unwrap();

        let changed = session
            .update_bone(
                "root",
                BonePatch {
                    name: Some("base".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(changed);
        let snap = session.snapshot();
        assert_eq!(snap.bones[1].parent.as_deref(), Some("base"));
        assert_eq!(snap.cubes[0].bone, "base");
        assert!(snap.animations[0].channels.contains_key("base"));
    }

    #[test]
    fn delete_bone_refuses_while_in_use() {
        let mut session = session_with_root();
        session
            .add_cube(NewCube {
                name: "body".into(),
                bone: "root".into(),
                from: [0.0; 3],
                to: [1.0; 3],
                ..Default::default()
            })
            .unwrap();
        let err = session.delete_bone("root").unwrap_err();
        assert_eq!(err.reason(), Some("bone_in_use"));
        session.delete_cube("body").unwrap();
        session.delete_bone("root").unwrap();
        assert!(session.snapshot().bones.is_empty());
    }

    #[test]
    fn set_face_uv_validates_rect_and_bounds() {
        let mut session = session_with_root();
        session
            .add_texture(NewTexture {
                name: "skin".into(),
                width: 16,
                height: 16,
                ..Default::default()
            })
            .unwrap();
        session
            .add_cube(NewCube {
                name: "body".into(),
                bone: "root".into(),
                from: [0.0; 3],
                to: [4.0, 4.0, 4.0],
                ..Default::default()
            })
            .unwrap();

        let err = session
            .set_face_uv("body", CubeFace::North, [4.0, 0.0, 0.0, 4.0], Some("skin".into()))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPayload);

        let err = session
            .set_face_uv("body", CubeFace::North, [0.0, 0.0, 20.0, 4.0], Some("skin".into()))
            .unwrap_err();
        assert!(err.message.contains("resolution"));

        let changed = session
            .set_face_uv("body", CubeFace::North, [0.0, 0.0, 4.0, 4.0], Some("skin".into()))
            .unwrap();
        assert!(changed);
        // Same assignment again is a no-op.
        let changed = session
            .set_face_uv("body", CubeFace::North, [0.0, 0.0, 4.0, 4.0], Some("skin".into()))
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn texture_rename_enforces_uniqueness() {
        let mut session = session_with_root();
        session
            .add_texture(NewTexture {
                name: "skin".into(),
                width: 16,
                height: 16,
                ..Default::default()
            })
            .unwrap();
        session
            .add_texture(NewTexture {
                name: "overlay".into(),
                width: 16,
                height: 16,
                ..Default::default()
            })
            .unwrap();

        // Renaming onto a sibling's name is rejected.
        let err = session
            .update_texture(
                "overlay",
                NewTexture {
                    name: "skin".into(),
                    width: 16,
                    height: 16,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPayload);

        // Keeping its own name is not a conflict, and a fresh name works.
        let changed = session
            .update_texture(
                "overlay",
                NewTexture {
                    name: "overlay".into(),
                    width: 16,
                    height: 16,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!changed);
        let changed = session
            .update_texture(
                "overlay",
                NewTexture {
                    name: "glow".into(),
                    width: 16,
                    height: 16,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(changed);
        assert!(session.find_texture("glow").is_some());
    }

    #[test]
    fn delete_texture_clears_face_references() {
        let mut session = session_with_root();
        session
            .add_texture(NewTexture {
                name: "skin".into(),
                width: 16,
                height: 16,
                ..Default::default()
            })
            .unwrap();
        session
            .add_cube(NewCube {
                name: "body".into(),
                bone: "root".into(),
                from: [0.0; 3],
                to: [4.0, 4.0, 4.0],
                ..Default::default()
            })
            .unwrap();
        session
            .set_face_uv("body", CubeFace::North, [0.0, 0.0, 4.0, 4.0], Some("skin".into()))
            .unwrap();
        session.delete_texture("skin").unwrap();
        let face = &session.snapshot().cubes[0].faces[&CubeFace::North];
        assert_eq!(face.texture, None);
    }

    #[test]
    fn frame_pose_extends_clip_length() {
        let mut session = session_with_root();
        session
            .add_animation(NewAnimation {
                name: "walk".into(),
                length: 0.5,
                fps: 20.0,
                r#loop: false,
            })
            .unwrap();
        let mut poses = HashMap::new();
        poses.insert(
            "root".to_string(),
            BonePose {
                position: Some([0.0, 1.0, 0.0]),
                ..Default::default()
            },
        );
        session.set_frame_pose("walk", 2.0, &poses).unwrap();
        assert_eq!(session.snapshot().animations[0].length, 2.0);
        let track = &session.snapshot().animations[0].channels["root"].position;
        assert_eq!(track.len(), 1);
        assert_eq!(track[0].time, 2.0);
    }

    #[test]
    fn animation_validation() {
        let mut session = session_with_root();
        let err = session
            .add_animation(NewAnimation {
                name: "bad".into(),
                length: -1.0,
                fps: 20.0,
                r#loop: false,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPayload);
        let err = session
            .add_animation(NewAnimation {
                name: "bad".into(),
                length: 1.0,
                fps: 0.0,
                r#loop: false,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPayload);
    }

    #[test]
    fn dirty_tracks_mutations() {
        let mut session = session_with_root();
        assert!(!session.snapshot().dirty);
        session
            .set_resolution(32, 32)
            .unwrap();
        assert!(session.snapshot().dirty);
        session.mark_clean();
        // Setting the same resolution again does not re-dirty.
        session.set_resolution(32, 32).unwrap();
        assert!(!session.snapshot().dirty);
    }
}
