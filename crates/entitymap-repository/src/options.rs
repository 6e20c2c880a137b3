//! Per-call options.

/// How far to eagerly resolve relations after a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preload {
    /// Leave every relation lazy.
    #[default]
    None,
    /// Resolve relations up to this many levels deep.
    Depth(usize),
    /// Resolve the whole reachable graph.
    All,
}

impl Preload {
    /// Remaining depth: `None` means unbounded.
    pub(crate) const fn depth(self) -> Option<usize> {
        match self {
            Preload::None => Some(0),
            Preload::Depth(depth) => Some(depth),
            Preload::All => None,
        }
    }
}

/// Options for `Repository::get`.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Eager relation resolution.
    pub preload: Preload,
}

impl GetOptions {
    /// Default options: nothing preloaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the preload depth.
    #[must_use]
    pub fn preload(mut self, preload: Preload) -> Self {
        self.preload = preload;
        self
    }
}

/// Options for `Repository::save`.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Save only the instance itself, not its relations.
    pub ignore_relations: bool,
    /// Fail instead of skipping related instances this repository does not own.
    pub reject_unknown_related_instances: bool,
    /// Keep members that were removed from a hasMany collection instead of
    /// deleting them (or their junction rows).
    pub keep_missing_related_instances: bool,
}

impl SaveOptions {
    /// Default options: full cascade.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the relation cascade.
    #[must_use]
    pub fn ignore_relations(mut self, value: bool) -> Self {
        self.ignore_relations = value;
        self
    }

    /// Fail on foreign related instances.
    #[must_use]
    pub fn reject_unknown_related_instances(mut self, value: bool) -> Self {
        self.reject_unknown_related_instances = value;
        self
    }

    /// Keep removed hasMany members.
    #[must_use]
    pub fn keep_missing_related_instances(mut self, value: bool) -> Self {
        self.keep_missing_related_instances = value;
        self
    }
}

/// Options for `Repository::reload` and `Repository::reload_all`.
#[derive(Debug, Clone, Default)]
pub struct ReloadOptions {
    /// Overwrite unsaved modifications instead of refusing.
    pub discard_changes: bool,
}

impl ReloadOptions {
    /// Default options: refuse when there are unsaved changes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite unsaved changes.
    #[must_use]
    pub fn discard_changes(mut self, value: bool) -> Self {
        self.discard_changes = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(GetOptions::default().preload, Preload::None);
        let save = SaveOptions::default();
        assert!(!save.ignore_relations);
        assert!(!save.reject_unknown_related_instances);
        assert!(!save.keep_missing_related_instances);
        assert!(!ReloadOptions::default().discard_changes);
    }

    #[test]
    fn test_preload_depth() {
        assert_eq!(Preload::None.depth(), Some(0));
        assert_eq!(Preload::Depth(2).depth(), Some(2));
        assert_eq!(Preload::All.depth(), None);
    }

    #[test]
    fn test_builders() {
        let save = SaveOptions::new()
            .ignore_relations(true)
            .keep_missing_related_instances(true);
        assert!(save.ignore_relations);
        assert!(save.keep_missing_related_instances);
        assert!(ReloadOptions::new().discard_changes(true).discard_changes);
    }
}
