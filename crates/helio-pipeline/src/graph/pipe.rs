//! Named render targets shared between stages

use super::StageId;
use crate::backend::{TargetDesc, TargetHandle};
use glam::UVec2;
use std::collections::HashMap;

/// Prefix for requiring the previous frame's contents of a pipe
pub const PREVIOUS_FRAME_PREFIX: &str = "PreviousFrame::";

/// Split `PreviousFrame::Name` into `Name`
pub fn previous_frame_source(pipe: &str) -> Option<&str> {
    pipe.strip_prefix(PREVIOUS_FRAME_PREFIX)
}

/// A target produced by a stage
#[derive(Debug, Clone)]
pub struct PipeEntry {
    pub handle: TargetHandle,
    pub desc: TargetDesc,
    pub size: UVec2,
    /// `None` for history copies, which the graph owns
    pub producer: Option<StageId>,
}

/// Current version of every pipe
///
/// Pass-through stages overwrite the entry of the pipe they rewrite, so
/// stages created later in execution order see the newest version.
#[derive(Debug, Default)]
pub struct PipeRegistry {
    pipes: HashMap<String, PipeEntry>,
    history: HashMap<String, PipeEntry>,
}

impl PipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a pipe, including `PreviousFrame::` history copies
    pub fn get(&self, name: &str) -> Option<&PipeEntry> {
        match previous_frame_source(name) {
            Some(source) => self.history.get(source),
            None => self.pipes.get(name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Size of the current version of a pipe
    pub fn size(&self, name: &str) -> Option<UVec2> {
        self.get(name).map(|p| p.size)
    }

    pub(crate) fn publish(&mut self, name: &str, entry: PipeEntry) {
        self.pipes.insert(name.to_string(), entry);
    }

    pub(crate) fn set_history(&mut self, name: &str, entry: PipeEntry) -> Option<PipeEntry> {
        self.history.insert(name.to_string(), entry)
    }

    pub(crate) fn history(&self) -> impl Iterator<Item = (&String, &PipeEntry)> {
        self.history.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.pipes.clear();
        self.history.clear();
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipes.keys().map(String::as_str)
    }
}
