//! Multi-segment post editor state
//!
//! A thread chain is an ordered list of segments. In linked mode every edit
//! lands on the canonical chain and is mirrored to every platform's copy; in
//! unlinked mode each platform's copy is edited on its own. Every chain holds
//! at least one segment.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::types::{MediaType, Platform, PostPayload};

/// One post of a chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub content: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

impl Segment {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            media_urls: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.media_urls.is_empty()
    }

    /// Derived from the media list on every call
    pub fn media_type(&self) -> MediaType {
        MediaType::from_media(&self.media_urls)
    }

    pub fn to_payload(&self) -> PostPayload {
        PostPayload {
            text: self.content.clone(),
            media_urls: self.media_urls.clone(),
            reply_to: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    #[default]
    Linked,
    Unlinked,
}

/// One value per platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerPlatform<T> {
    #[serde(default)]
    pub threads: T,
    #[serde(default)]
    pub x: T,
    #[serde(default)]
    pub farcaster: T,
}

impl<T> PerPlatform<T> {
    pub fn from_fn(mut f: impl FnMut(Platform) -> T) -> Self {
        Self {
            threads: f(Platform::Threads),
            x: f(Platform::X),
            farcaster: f(Platform::Farcaster),
        }
    }

    pub fn get(&self, platform: Platform) -> &T {
        match platform {
            Platform::Threads => &self.threads,
            Platform::X => &self.x,
            Platform::Farcaster => &self.farcaster,
        }
    }

    pub fn get_mut(&mut self, platform: Platform) -> &mut T {
        match platform {
            Platform::Threads => &mut self.threads,
            Platform::X => &mut self.x,
            Platform::Farcaster => &mut self.farcaster,
        }
    }
}

fn single_empty() -> Vec<Segment> {
    vec![Segment::default()]
}

fn default_active() -> PerPlatform<bool> {
    PerPlatform {
        threads: true,
        x: false,
        farcaster: false,
    }
}

fn non_empty(segments: Vec<Segment>) -> Vec<Segment> {
    if segments.is_empty() {
        single_empty()
    } else {
        segments
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadChain {
    #[serde(default)]
    mode: ChainMode,
    #[serde(default = "single_empty")]
    canonical: Vec<Segment>,
    #[serde(default = "default_active")]
    active: PerPlatform<bool>,
    #[serde(default)]
    copies: PerPlatform<Vec<Segment>>,
    /// Platform copies overwritten by the last switch back to linked mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recovery: Option<PerPlatform<Vec<Segment>>>,
    #[serde(skip)]
    pending: Option<Vec<Segment>>,
}

impl Default for ThreadChain {
    fn default() -> Self {
        Self {
            mode: ChainMode::Linked,
            canonical: single_empty(),
            active: default_active(),
            copies: PerPlatform::from_fn(|_| single_empty()),
            recovery: None,
            pending: None,
        }
    }
}

impl ThreadChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ChainMode {
        self.mode
    }

    pub fn is_linked(&self) -> bool {
        self.mode == ChainMode::Linked
    }

    /// The canonical chain
    pub fn segments(&self) -> &[Segment] {
        &self.canonical
    }

    /// The chain that would be published to `platform`
    pub fn platform_segments(&self, platform: Platform) -> &[Segment] {
        self.copies.get(platform)
    }

    /// Payloads for `platform`, in chain order
    pub fn payloads_for(&self, platform: Platform) -> Vec<PostPayload> {
        self.platform_segments(platform)
            .iter()
            .map(Segment::to_payload)
            .collect()
    }

    fn fan_out(&mut self) {
        if self.is_linked() {
            let canonical = &self.canonical;
            self.copies = PerPlatform::from_fn(|_| canonical.clone());
        }
    }

    /// Switch between linked and unlinked editing.
    ///
    /// Going unlinked seeds every empty platform copy from the canonical
    /// chain. Going linked overwrites every copy with the canonical chain;
    /// copies that differed are kept for [`ThreadChain::restore_unlinked`].
    /// When nothing differed, any older recovery buffer is dropped.
    pub fn set_mode(&mut self, mode: ChainMode) {
        if self.mode == mode {
            return;
        }

        match mode {
            ChainMode::Unlinked => {
                for platform in Platform::ALL {
                    let copy = self.copies.get_mut(platform);
                    if copy.is_empty() {
                        *copy = self.canonical.clone();
                    }
                }
            }
            ChainMode::Linked => {
                let diverged = Platform::ALL
                    .iter()
                    .any(|p| self.copies.get(*p) != &self.canonical);
                self.recovery = if diverged {
                    tracing::debug!("Keeping unlinked copies for recovery");
                    Some(self.copies.clone())
                } else {
                    None
                };
            }
        }

        self.mode = mode;
        self.fan_out();
    }

    /// Whether copies discarded by the last switch to linked mode can be restored
    pub fn has_recovery(&self) -> bool {
        self.recovery.is_some()
    }

    /// Return to unlinked mode with the copies the last switch to linked mode
    /// overwrote. Returns false when there is nothing to restore.
    pub fn restore_unlinked(&mut self) -> bool {
        match self.recovery.take() {
            Some(copies) => {
                self.copies = copies;
                self.mode = ChainMode::Unlinked;
                true
            }
            None => false,
        }
    }

    /// Replace the canonical chain
    pub fn set_segments(&mut self, segments: Vec<Segment>) {
        self.canonical = non_empty(segments);
        self.fan_out();
    }

    pub fn set_content(&mut self, index: usize, content: impl Into<String>) -> bool {
        match self.canonical.get_mut(index) {
            Some(segment) => {
                segment.content = content.into();
                self.fan_out();
                true
            }
            None => false,
        }
    }

    pub fn set_media(&mut self, index: usize, media_urls: Vec<String>) -> bool {
        match self.canonical.get_mut(index) {
            Some(segment) => {
                segment.media_urls = media_urls;
                self.fan_out();
                true
            }
            None => false,
        }
    }

    pub fn add_segment(&mut self) {
        self.canonical.push(Segment::default());
        self.fan_out();
    }

    /// Remove a segment; the last remaining one is never removed
    pub fn remove_segment(&mut self, index: usize) -> bool {
        if self.canonical.len() <= 1 || index >= self.canonical.len() {
            return false;
        }
        self.canonical.remove(index);
        self.fan_out();
        true
    }

    /// Grow the canonical chain to at least `count` segments
    pub fn ensure_count(&mut self, count: usize) {
        if self.canonical.len() >= count {
            return;
        }
        self.canonical.resize_with(count, Segment::default);
        self.fan_out();
    }

    /// Write into a segment that may not exist yet. Used while content streams
    /// in one segment at a time.
    pub fn set_content_at(&mut self, index: usize, content: impl Into<String>) {
        self.ensure_count(index + 1);
        self.set_content(index, content);
    }

    /// Append `content` as a new segment, or fill the chain's only segment if
    /// it has neither text nor media
    pub fn add_content_as_segment(&mut self, content: impl Into<String>) {
        let segment = Segment::text(content);
        if self.canonical.len() == 1 && self.canonical[0].is_empty() {
            self.canonical[0] = segment;
        } else {
            self.canonical.push(segment);
        }
        self.fan_out();
    }

    /// Drop every segment whose trimmed content equals the trimmed `content`
    pub fn remove_content(&mut self, content: &str) -> usize {
        let needle = content.trim();
        let before = self.canonical.len();
        self.canonical.retain(|s| s.content.trim() != needle);
        let removed = before - self.canonical.len();
        if self.canonical.is_empty() {
            self.canonical = single_empty();
        }
        if removed > 0 {
            self.fan_out();
        }
        removed
    }

    /// Edit one platform's copy. In linked mode the edit applies to the
    /// canonical chain instead.
    fn edit_copy<R>(&mut self, platform: Platform, edit: impl FnOnce(&mut Vec<Segment>) -> R) -> R {
        if self.is_linked() {
            let result = edit(&mut self.canonical);
            self.fan_out();
            result
        } else {
            edit(self.copies.get_mut(platform))
        }
    }

    pub fn set_platform_segments(&mut self, platform: Platform, segments: Vec<Segment>) {
        let segments = non_empty(segments);
        self.edit_copy(platform, |copy| *copy = segments);
    }

    pub fn set_platform_content(
        &mut self,
        platform: Platform,
        index: usize,
        content: impl Into<String>,
    ) -> bool {
        let content = content.into();
        self.edit_copy(platform, |copy| match copy.get_mut(index) {
            Some(segment) => {
                segment.content = content;
                true
            }
            None => false,
        })
    }

    pub fn set_platform_media(
        &mut self,
        platform: Platform,
        index: usize,
        media_urls: Vec<String>,
    ) -> bool {
        self.edit_copy(platform, |copy| match copy.get_mut(index) {
            Some(segment) => {
                segment.media_urls = media_urls;
                true
            }
            None => false,
        })
    }

    pub fn add_platform_segment(&mut self, platform: Platform) {
        self.edit_copy(platform, |copy| copy.push(Segment::default()));
    }

    pub fn remove_platform_segment(&mut self, platform: Platform, index: usize) -> bool {
        self.edit_copy(platform, |copy| {
            if copy.len() <= 1 || index >= copy.len() {
                return false;
            }
            copy.remove(index);
            true
        })
    }

    pub fn ensure_platform_count(&mut self, platform: Platform, count: usize) {
        self.edit_copy(platform, |copy| {
            if copy.len() < count {
                copy.resize_with(count, Segment::default);
            }
        });
    }

    pub fn pending(&self) -> Option<&[Segment]> {
        self.pending.as_deref()
    }

    /// Stage a chain to be applied later, e.g. a generated draft awaiting review
    pub fn set_pending(&mut self, segments: Option<Vec<Segment>>) {
        self.pending = segments;
    }

    /// Replace the canonical chain with the pending one, if any
    pub fn apply_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(segments) => {
                self.set_segments(segments);
                true
            }
            None => false,
        }
    }

    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    pub fn is_platform_active(&self, platform: Platform) -> bool {
        *self.active.get(platform)
    }

    pub fn set_platform_active(&mut self, platform: Platform, active: bool) {
        *self.active.get_mut(platform) = active;
    }

    pub fn toggle_platform(&mut self, platform: Platform) -> bool {
        let flag = self.active.get_mut(platform);
        *flag = !*flag;
        *flag
    }

    pub fn active_platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.is_platform_active(*p))
            .collect()
    }

    /// Reset every chain to a single empty segment. Mode and platform flags are kept.
    pub fn clear(&mut self) {
        self.canonical = single_empty();
        self.copies = PerPlatform::from_fn(|_| single_empty());
        self.recovery = None;
    }

    /// Restore the at-least-one-segment invariant after deserializing
    fn normalize(mut self) -> Self {
        if self.canonical.is_empty() {
            self.canonical = single_empty();
        }
        for platform in Platform::ALL {
            let copy = self.copies.get_mut(platform);
            if copy.is_empty() {
                *copy = self.canonical.clone();
            }
        }
        self.fan_out();
        self
    }

    /// Load a saved chain. A missing file yields an empty chain and a corrupt
    /// one is logged and replaced by an empty chain.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match toml::from_str::<ThreadChain>(&content) {
            Ok(chain) => Ok(chain.normalize()),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring unreadable thread chain: {}", e);
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
