/// Authorizes exactly one configured user id for privileged commands.
///
/// Unauthorized commands must be dropped silently: handlers check this gate
/// before doing any I/O and send no reply at all on failure, so outsiders
/// cannot probe which commands exist.
#[derive(Debug, Clone, Copy)]
pub struct AdminGate {
    admin_id: i64,
}

impl AdminGate {
    pub fn new(admin_id: i64) -> Self {
        Self { admin_id }
    }

    /// True iff `sender_id` is the configured administrator.
    pub fn is_authorized(&self, sender_id: i64) -> bool {
        sender_id == self.admin_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_configured_id_passes() {
        let gate = AdminGate::new(42);
        assert!(gate.is_authorized(42));
        assert!(!gate.is_authorized(41));
        assert!(!gate.is_authorized(43));
        assert!(!gate.is_authorized(0));
        assert!(!gate.is_authorized(-42));
    }
}
