use super::attempt::GUEST_USER_ID;

/// Who is taking the quiz. Guests get scored results but nothing is persisted
/// remotely for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Guest,
    User(String),
}

impl Identity {
    /// Blank values and the reserved guest owner id both mean "not signed in".
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(id) if !id.is_empty() && id != GUEST_USER_ID => Identity::User(id.to_string()),
            _ => Identity::Guest,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::User(id) => Some(id),
            Identity::Guest => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, Identity::User(_))
    }

    /// Owner recorded on the attempt.
    pub fn owner(&self) -> &str {
        self.user_id().unwrap_or(GUEST_USER_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_header_is_guest() {
        assert_eq!(Identity::from_header(None), Identity::Guest);
        assert_eq!(Identity::from_header(Some("  ")), Identity::Guest);
        assert_eq!(Identity::Guest.owner(), "guest");
    }

    #[test]
    fn reserved_guest_id_is_not_a_user() {
        let id = Identity::from_header(Some(GUEST_USER_ID));
        assert_eq!(id, Identity::Guest);
        assert!(id.user_id().is_none());
        assert_eq!(Identity::from_header(Some(" guest ")), Identity::Guest);
    }

    #[test]
    fn header_value_is_user() {
        let id = Identity::from_header(Some("u-42"));
        assert!(id.is_signed_in());
        assert_eq!(id.owner(), "u-42");
    }
}
