//! Network identity helpers.
//!
//! Identities look like `user[:device]@server`. The device suffix is transient
//! (one per linked device or session), so every identity the gateway stores is
//! normalized with it stripped.

/// Server of phone-number identities.
pub const PHONE_SERVER: &str = "s.whatsapp.net";
/// Server of anonymized identities.
pub const ANONYMIZED_SERVER: &str = "lid";
/// Server of group conversations.
pub const GROUP_SERVER: &str = "g.us";

/// Strip the `:device` suffix from the user part.
///
/// `62811:12@s.whatsapp.net` becomes `62811@s.whatsapp.net`. Identities
/// without a server part are returned unchanged apart from the suffix.
pub fn normalize(jid: &str) -> String {
    let jid = jid.trim();
    match jid.split_once('@') {
        Some((user, server)) => {
            let user = user.split_once(':').map_or(user, |(base, _)| base);
            format!("{}@{}", user, server)
        }
        None => jid.split_once(':').map_or(jid, |(base, _)| base).to_string(),
    }
}

/// User part without device suffix, e.g. the phone number of a phone identity.
pub fn phone_number(jid: &str) -> String {
    let user = jid.split_once('@').map_or(jid, |(user, _)| user);
    user.split_once(':')
        .map_or(user, |(base, _)| base)
        .trim()
        .to_string()
}

/// Server part, empty when absent.
pub fn server(jid: &str) -> &str {
    jid.split_once('@').map_or("", |(_, server)| server)
}

pub fn is_anonymized(jid: &str) -> bool {
    server(jid) == ANONYMIZED_SERVER
}

pub fn is_phone(jid: &str) -> bool {
    server(jid) == PHONE_SERVER
}

pub fn is_group(jid: &str) -> bool {
    server(jid) == GROUP_SERVER
}

/// Phone-form identity for a phone number.
pub fn phone_jid(number: &str) -> String {
    format!("{}@{}", number, PHONE_SERVER)
}

/// Order two identities of the same person as (anonymized, phone).
///
/// Returns `None` unless exactly one side is anonymized and the other is a
/// phone identity.
pub fn alias_pair<'a>(a: &'a str, b: &'a str) -> Option<(&'a str, &'a str)> {
    if is_anonymized(a) && is_phone(b) {
        Some((a, b))
    } else if is_phone(a) && is_anonymized(b) {
        Some((b, a))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_device_suffix() {
        assert_eq!(normalize("62811:12@s.whatsapp.net"), "62811@s.whatsapp.net");
        assert_eq!(normalize("62811@s.whatsapp.net"), "62811@s.whatsapp.net");
        assert_eq!(normalize("1234567:3@lid"), "1234567@lid");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("62811:7@s.whatsapp.net");
        assert_eq!(normalize(&once), once);
        assert_eq!(normalize("62811@s.whatsapp.net"), once);
    }

    #[test]
    fn group_and_server_classification() {
        assert!(is_group("120363@g.us"));
        assert!(!is_group("62811@s.whatsapp.net"));
        assert!(is_anonymized("998877@lid"));
        assert!(is_phone("62811:4@s.whatsapp.net"));
        assert_eq!(server("no-server"), "");
    }

    #[test]
    fn phone_number_drops_device_and_server() {
        assert_eq!(phone_number("62811:4@s.whatsapp.net"), "62811");
        assert_eq!(phone_jid("62811"), "62811@s.whatsapp.net");
    }

    #[test]
    fn alias_pair_orders_and_rejects() {
        assert_eq!(
            alias_pair("62811@s.whatsapp.net", "998877@lid"),
            Some(("998877@lid", "62811@s.whatsapp.net"))
        );
        assert_eq!(
            alias_pair("998877@lid", "62811@s.whatsapp.net"),
            Some(("998877@lid", "62811@s.whatsapp.net"))
        );
        assert_eq!(alias_pair("a@lid", "b@lid"), None);
        assert_eq!(alias_pair("a@s.whatsapp.net", "b@g.us"), None);
    }
}
