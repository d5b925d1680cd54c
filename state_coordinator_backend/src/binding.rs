/// Which character the active states currently apply to.
///
/// Keyed by a stable character id, never by display name: two characters can
/// share a name, and a rename would orphan the persisted record.
#[derive(Debug, Clone, Default)]
pub struct CharacterBinding {
    current: Option<String>,
}

impl CharacterBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Switch to another character. Returns whether the identity changed.
    ///
    /// Blank ids unbind.
    pub fn bind(&mut self, character_id: &str) -> bool {
        let next = Some(character_id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        if next == self.current {
            return false;
        }
        tracing::info!("Character binding {:?} -> {:?}", self.current, next);
        self.current = next;
        true
    }
}
