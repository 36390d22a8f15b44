use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterMode {
    #[default]
    Off,
    Whitelist,
    Blacklist,
}

impl FilterMode {
    /// Off -> Whitelist -> Blacklist -> Off
    pub fn next(self) -> Self {
        match self {
            FilterMode::Off => FilterMode::Whitelist,
            FilterMode::Whitelist => FilterMode::Blacklist,
            FilterMode::Blacklist => FilterMode::Off,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterMode::Off => "Off",
            FilterMode::Whitelist => "Whitelist",
            FilterMode::Blacklist => "Blacklist",
        }
    }
}

/// Identifier visibility for the event stream. Filtering only hides
/// events from consumers; it never affects the message table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterSet {
    pub mode: FilterMode,
    ids: BTreeSet<u32>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: FilterMode) {
        self.mode = mode;
    }

    /// Add or remove `id`, returning whether it is now in the set.
    pub fn toggle(&mut self, id: u32) -> bool {
        if self.ids.remove(&id) {
            false
        } else {
            self.ids.insert(id);
            true
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }

    pub fn is_visible(&self, id: u32) -> bool {
        match self.mode {
            FilterMode::Off => true,
            FilterMode::Whitelist => self.ids.contains(&id),
            FilterMode::Blacklist => !self.ids.contains(&id),
        }
    }
}
