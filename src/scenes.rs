//! Scenes, scene indices and the 18-scene schema.
//!
//! A [`SceneSet`] can only be built through [`SceneSet::validate`] (or by
//! deserializing, which calls it), so holding one means all of `scene_1`
//! through `scene_18` are present and nothing else is.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::SCENE_COUNT;
use crate::error::AdtoonError;

const SCENE_KEY_PREFIX: &str = "scene_";

/// One unit of the narrative: a short script line and the keyword the
/// illustration should show.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Scene dialogue/script text
    pub script: String,
    /// Main keyword for image generation
    pub main_keyword: String,
}

/// A scene number in `1..=18`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SceneIndex(usize);

/// Rejected scene numbers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SceneIndexError {
    /// The number is outside `1..=18`.
    OutOfRange(usize),
    /// The key isn't of the form `scene_<N>`.
    BadKey(String),
}

impl std::fmt::Display for SceneIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange(n) => {
                write!(f, "Scene number must be between 1 and {SCENE_COUNT}, got {n}")
            }
            Self::BadKey(key) => write!(f, "Not a scene key: {key}"),
        }
    }
}

impl std::error::Error for SceneIndexError {}

impl SceneIndex {
    /// Checks that `number` is a valid scene number.
    pub fn new(number: usize) -> Result<Self, SceneIndexError> {
        if (1..=SCENE_COUNT).contains(&number) {
            Ok(Self(number))
        } else {
            Err(SceneIndexError::OutOfRange(number))
        }
    }

    /// Parses a `scene_<N>` key.
    pub fn from_key(key: &str) -> Result<Self, SceneIndexError> {
        let number = key
            .strip_prefix(SCENE_KEY_PREFIX)
            .and_then(|rest| rest.parse::<usize>().ok())
            .ok_or_else(|| SceneIndexError::BadKey(key.to_string()))?;
        Self::new(number)
    }

    /// The 1-based scene number.
    pub fn get(self) -> usize {
        self.0
    }

    /// The map key used in scene files, eg `scene_7`.
    pub fn key(self) -> String {
        format!("{SCENE_KEY_PREFIX}{}", self.0)
    }

    /// Every scene index in order.
    pub fn all() -> impl Iterator<Item = SceneIndex> {
        (1..=SCENE_COUNT).map(SceneIndex)
    }
}

impl std::fmt::Display for SceneIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<usize> for SceneIndex {
    type Error = SceneIndexError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Ways a candidate scene map can break the schema.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SceneSetError {
    /// The map doesn't hold exactly `expected` entries.
    WrongCount {
        /// Always 18.
        expected: usize,
        /// Entries actually present.
        found: usize,
    },
    /// The count is right but a required key is absent (so some other key
    /// took its place).
    MissingScene(String),
}

impl std::fmt::Display for SceneSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongCount { expected, found } if found < expected => write!(
                f,
                "Must have exactly {expected} scenes, got {found} ({} missing)",
                expected - found
            ),
            Self::WrongCount { expected, found } => write!(
                f,
                "Must have exactly {expected} scenes, got {found} ({} surplus)",
                found - expected
            ),
            Self::MissingScene(key) => write!(f, "Missing required scene: {key}"),
        }
    }
}

impl std::error::Error for SceneSetError {}

/// On-disk shape of a scene file.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SceneDocument {
    scenes: BTreeMap<String, Scene>,
}

/// The validated collection of 18 scenes for one narrative.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SceneDocument", into = "SceneDocument")]
pub struct SceneSet {
    // scenes[i] is scene i + 1
    scenes: Vec<Scene>,
}

impl TryFrom<SceneDocument> for SceneSet {
    type Error = SceneSetError;

    fn try_from(document: SceneDocument) -> Result<Self, Self::Error> {
        Self::validate(document.scenes)
    }
}

impl From<SceneSet> for SceneDocument {
    fn from(set: SceneSet) -> Self {
        SceneDocument {
            scenes: set.into_map(),
        }
    }
}

impl SceneSet {
    /// Accepts `candidate` only if it has exactly the keys `scene_1` through
    /// `scene_18`. Never fills gaps or drops extras.
    pub fn validate(mut candidate: BTreeMap<String, Scene>) -> Result<Self, SceneSetError> {
        if candidate.len() != SCENE_COUNT {
            return Err(SceneSetError::WrongCount {
                expected: SCENE_COUNT,
                found: candidate.len(),
            });
        }

        let mut scenes = Vec::with_capacity(SCENE_COUNT);
        for index in SceneIndex::all() {
            let key = index.key();
            let Some(scene) = candidate.remove(&key) else {
                return Err(SceneSetError::MissingScene(key));
            };
            scenes.push(scene);
        }
        Ok(Self { scenes })
    }

    /// Parses and validates a scene file's contents.
    pub fn from_json_str(raw: &str) -> Result<Self, AdtoonError> {
        let document: SceneDocument = serde_json::from_str(raw)?;
        Ok(Self::validate(document.scenes)?)
    }

    /// Loads a scene file.
    pub async fn load(path: &Path) -> Result<Self, AdtoonError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let set = Self::from_json_str(&raw)?;
        debug!("Loaded scenes from {}", path.display());
        Ok(set)
    }

    /// Writes the scene file in one go, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<(), AdtoonError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json_pretty()?).await?;
        info!("Saved scenes to {}", path.display());
        Ok(())
    }

    /// Pretty JSON in the scene file format.
    pub fn to_json_pretty(&self) -> Result<String, AdtoonError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Looks up one scene.
    pub fn get(&self, index: SceneIndex) -> &Scene {
        &self.scenes[index.get() - 1]
    }

    /// All scenes in order with their index.
    pub fn iter(&self) -> impl Iterator<Item = (SceneIndex, &Scene)> {
        SceneIndex::all().zip(self.scenes.iter())
    }

    /// Back to the keyed map form.
    pub fn into_map(self) -> BTreeMap<String, Scene> {
        SceneIndex::all()
            .map(|index| index.key())
            .zip(self.scenes)
            .collect()
    }

    /// The whole story as one block, given to the image model so every
    /// illustration knows where it sits in the narrative.
    pub fn story_context(&self) -> String {
        let mut context = format!("COMPLETE STORY CONTEXT (All {SCENE_COUNT} Scenes):\n");
        for (index, scene) in self.iter() {
            context.push_str(&format!(
                "Scene {index}: {} (keyword: {})\n",
                scene.script, scene.main_keyword
            ));
        }
        context
    }
}

/// Test fixtures shared by other modules' tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn scene(n: usize) -> Scene {
        Scene {
            script: format!("script {n}"),
            main_keyword: format!("keyword{n}"),
        }
    }

    pub(crate) fn scene_map(count: usize) -> BTreeMap<String, Scene> {
        (1..=count)
            .map(|n| (format!("scene_{n}"), scene(n)))
            .collect()
    }

    pub(crate) fn scene_set() -> SceneSet {
        SceneSet::validate(scene_map(SCENE_COUNT)).expect("valid fixture")
    }
}
