//! IMAP message flag handling

use std::borrow::Cow;

use async_imap::types::Flag;
use mailbus_core::MessageFlags;

/// IMAP spelling of a flag ("\Seen", "\Recent", custom keywords verbatim)
pub fn flag_name<'a>(flag: &'a Flag<'_>) -> Cow<'a, str> {
    match flag {
        Flag::Seen => Cow::Borrowed("\\Seen"),
        Flag::Answered => Cow::Borrowed("\\Answered"),
        Flag::Flagged => Cow::Borrowed("\\Flagged"),
        Flag::Deleted => Cow::Borrowed("\\Deleted"),
        Flag::Draft => Cow::Borrowed("\\Draft"),
        Flag::Recent => Cow::Borrowed("\\Recent"),
        Flag::MayCreate => Cow::Borrowed("\\*"),
        Flag::Custom(name) => Cow::Borrowed(name.as_ref()),
    }
}

/// Convert the flags of a FETCH response
pub fn message_flags<'a, I>(flags: I) -> MessageFlags
where
    I: IntoIterator<Item = Flag<'a>>,
{
    let flags: Vec<Flag<'a>> = flags.into_iter().collect();
    let names: Vec<Cow<'_, str>> = flags.iter().map(flag_name).collect();
    let refs: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();
    MessageFlags::from_imap_flags(&refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_flags() {
        let flags = message_flags(vec![Flag::Seen, Flag::Recent, Flag::Flagged]);
        assert!(flags.seen);
        assert!(flags.recent);
        assert!(flags.flagged);
        assert!(!flags.deleted);
        assert!(flags.custom.is_empty());
    }

    #[test]
    fn test_custom_flags() {
        let flags = message_flags(vec![Flag::Custom(Cow::Borrowed("$Forwarded"))]);
        assert!(!flags.seen);
        assert!(flags.custom.contains("$forwarded"));
    }

    #[test]
    fn test_no_flags() {
        assert_eq!(message_flags(Vec::new()), MessageFlags::default());
    }
}
