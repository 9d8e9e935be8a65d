// Session Credentials Service
// Issues the session OTP and keeps the roster of UIDs bound to one video session

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use subtle::ConstantTimeEq;

pub const OTP_MIN_LEN: usize = 8;
pub const OTP_MAX_LEN: usize = 32;

const OTP_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn uid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("static uid pattern")
    })
}

/// A UID becomes one segment of a MediaMTX path, so it must be a single safe segment
pub fn is_valid_uid(uid: &str) -> bool {
    uid_pattern().is_match(uid)
}

/// Role a UID plays inside a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum UidRole {
    Primary,
    SourceCamera,
    VirtualCamera,
    Other(String),
}

impl UidRole {
    pub fn as_str(&self) -> &str {
        match self {
            UidRole::Primary => "primary",
            UidRole::SourceCamera => "source_camera",
            UidRole::VirtualCamera => "virtual_camera",
            UidRole::Other(name) => name,
        }
    }
}

impl From<&str> for UidRole {
    fn from(value: &str) -> Self {
        match value {
            "primary" => UidRole::Primary,
            "source_camera" => UidRole::SourceCamera,
            "virtual_camera" => UidRole::VirtualCamera,
            other => UidRole::Other(other.to_string()),
        }
    }
}

impl From<String> for UidRole {
    fn from(value: String) -> Self {
        UidRole::from(value.as_str())
    }
}

impl From<UidRole> for String {
    fn from(role: UidRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for UidRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UidEntry {
    pub uid: String,
    pub role: UidRole,
}

/// Session identity: one secret OTP and an ordered roster of `(uid, role)` pairs.
///
/// Exactly one `Primary` entry exists at all times and it can never be removed.
#[derive(Clone)]
pub struct SessionCredentials {
    otp: String,
    uids: Vec<UidEntry>,
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("otp", &"********")
            .field("uids", &self.uids)
            .finish()
    }
}

impl SessionCredentials {
    /// Create credentials, generating whatever is not supplied
    pub fn new(uid: Option<String>, otp: Option<String>) -> Self {
        let uid = uid.filter(|u| !u.is_empty()).unwrap_or_else(Self::random_uid);
        Self {
            otp: Self::accept_otp(otp),
            uids: vec![UidEntry {
                uid,
                role: UidRole::Primary,
            }],
        }
    }

    fn accept_otp(otp: Option<String>) -> String {
        match otp {
            Some(otp) if (OTP_MIN_LEN..=OTP_MAX_LEN).contains(&otp.chars().count()) => otp,
            Some(_) => {
                log::warn!("Supplied OTP length outside {OTP_MIN_LEN}..={OTP_MAX_LEN}, generating a new one");
                Self::random_otp(None)
            }
            None => Self::random_otp(None),
        }
    }

    pub fn otp(&self) -> &str {
        &self.otp
    }

    pub fn uids(&self) -> &[UidEntry] {
        &self.uids
    }

    pub fn primary_uid(&self) -> &str {
        self.uids
            .iter()
            .find(|entry| entry.role == UidRole::Primary)
            .map(|entry| entry.uid.as_str())
            .unwrap_or_default()
    }

    /// Append `(uid, role)` unless that exact pair is already present.
    /// A second `Primary` is never accepted.
    pub fn add_uid(&mut self, uid: &str, role: UidRole) -> bool {
        if role == UidRole::Primary {
            return false;
        }
        if self.uids.iter().any(|e| e.uid == uid && e.role == role) {
            return false;
        }
        self.uids.push(UidEntry {
            uid: uid.to_string(),
            role,
        });
        true
    }

    /// Generate a UID, bind it to `role` and return it
    pub fn add_random_uid(&mut self, role: UidRole) -> String {
        let uid = Self::random_uid();
        self.add_uid(&uid, role);
        uid
    }

    pub fn find_uids_by_role(&self, role: &UidRole) -> Vec<String> {
        self.uids
            .iter()
            .filter(|entry| &entry.role == role)
            .map(|entry| entry.uid.clone())
            .collect()
    }

    /// Every role bound to `uid`
    pub fn roles_of(&self, uid: &str) -> Vec<UidRole> {
        self.uids
            .iter()
            .filter(|entry| entry.uid == uid)
            .map(|entry| entry.role.clone())
            .collect()
    }

    /// Remove `uid` (optionally only under `role`). The primary UID is never removed.
    pub fn remove_uid(&mut self, uid: &str, role: Option<&UidRole>) -> bool {
        if uid == self.primary_uid() {
            return false;
        }
        let position = self
            .uids
            .iter()
            .position(|e| e.uid == uid && role.map_or(true, |r| &e.role == r));
        match position {
            Some(index) => {
                self.uids.remove(index);
                true
            }
            None => false,
        }
    }

    /// True iff `otp` matches exactly and `uid` is in the roster under any role
    pub fn valid(&self, otp: &str, uid: &str) -> bool {
        let otp_matches: bool = self.otp.as_bytes().ct_eq(otp.as_bytes()).into();
        otp_matches && self.uids.iter().any(|entry| entry.uid == uid)
    }

    /// Replace the OTP and collapse the roster to a single primary entry
    pub fn reset(&mut self, primary_uid: Option<String>, otp: Option<String>) {
        let uid = primary_uid
            .filter(|u| !u.is_empty())
            .unwrap_or_else(Self::random_uid);
        self.uids = vec![UidEntry {
            uid,
            role: UidRole::Primary,
        }];
        self.otp = Self::accept_otp(otp);
    }

    /// 128-bit random UID as 32 lowercase hex characters
    pub fn random_uid() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// URL-safe random OTP. Without a length one is picked in the allowed range;
    /// a requested length is clamped into it.
    pub fn random_otp(length: Option<usize>) -> String {
        let mut rng = rand::thread_rng();
        let length = match length {
            Some(len) => len.clamp(OTP_MIN_LEN, OTP_MAX_LEN),
            None => rng.gen_range(OTP_MIN_LEN..=OTP_MAX_LEN),
        };
        (0..length)
            .map(|_| OTP_ALPHABET[rng.gen_range(0..OTP_ALPHABET.len())] as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn is_otp_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '-' || c == '_'
    }

    #[test]
    fn test_generated_values_have_expected_format() {
        let creds = SessionCredentials::new(None, None);
        let uid = creds.primary_uid();
        assert_eq!(uid.len(), 32);
        assert!(uid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let otp_len = creds.otp().len();
        assert!((OTP_MIN_LEN..=OTP_MAX_LEN).contains(&otp_len));
        assert!(creds.otp().chars().all(is_otp_char));
    }

    #[test]
    fn test_regeneration_never_repeats() {
        let mut creds = SessionCredentials::new(None, Some("0123456789abcdef".into()));
        let mut seen_uids = HashSet::new();
        let mut seen_otps = HashSet::new();
        for _ in 0..200 {
            assert!(seen_uids.insert(creds.primary_uid().to_string()));
            // Fixed-length OTPs so short draws do not collide by chance
            creds.reset(None, Some(SessionCredentials::random_otp(Some(32))));
            assert!(seen_otps.insert(creds.otp().to_string()));
        }
    }

    #[test]
    fn test_random_otp_length_is_clamped() {
        assert_eq!(SessionCredentials::random_otp(Some(2)).len(), OTP_MIN_LEN);
        assert_eq!(SessionCredentials::random_otp(Some(500)).len(), OTP_MAX_LEN);
        assert_eq!(SessionCredentials::random_otp(Some(12)).len(), 12);
    }

    #[test]
    fn test_seeded_otp_outside_bounds_is_replaced() {
        let creds = SessionCredentials::new(Some("abc".into()), Some("short".into()));
        assert_eq!(creds.primary_uid(), "abc");
        assert_ne!(creds.otp(), "short");
        assert!(creds.otp().len() >= OTP_MIN_LEN);
    }

    #[test]
    fn test_add_uid_is_idempotent_per_pair() {
        let mut creds = SessionCredentials::new(Some("p".into()), None);
        assert!(creds.add_uid("cam", UidRole::SourceCamera));
        assert!(!creds.add_uid("cam", UidRole::SourceCamera));
        assert!(creds.add_uid("cam", UidRole::VirtualCamera));

        let count = creds
            .uids()
            .iter()
            .filter(|e| e.uid == "cam" && e.role == UidRole::SourceCamera)
            .count();
        assert_eq!(count, 1);
        assert_eq!(creds.roles_of("cam"), vec![UidRole::SourceCamera, UidRole::VirtualCamera]);
    }

    #[test]
    fn test_add_random_uid_binds_role() {
        let mut creds = SessionCredentials::new(Some("p".into()), None);
        let uid = creds.add_random_uid(UidRole::VirtualCamera);
        assert!(is_valid_uid(&uid));
        assert_eq!(creds.roles_of(&uid), vec![UidRole::VirtualCamera]);
        assert_ne!(uid, creds.primary_uid());
    }

    #[test]
    fn test_uid_must_be_one_path_segment() {
        assert!(is_valid_uid("cam-01"));
        assert!(is_valid_uid(&SessionCredentials::random_uid()));
        assert!(is_valid_uid("front.door_2"));
        let too_long = "a".repeat(129);
        for bad in ["", ".", "..", "x/../victim", "a?jwt=x", "a#b", "cam 1", "-lead", too_long.as_str()] {
            assert!(!is_valid_uid(bad), "{bad} accepted");
        }
    }

    #[test]
    fn test_second_primary_is_refused() {
        let mut creds = SessionCredentials::new(Some("p".into()), None);
        assert!(!creds.add_uid("other", UidRole::Primary));
        assert_eq!(creds.find_uids_by_role(&UidRole::Primary), vec!["p".to_string()]);
    }

    #[test]
    fn test_find_unknown_role_is_empty() {
        let creds = SessionCredentials::new(None, None);
        assert!(creds.find_uids_by_role(&UidRole::from("viewer")).is_empty());
    }

    #[test]
    fn test_primary_uid_cannot_be_removed() {
        let mut creds = SessionCredentials::new(Some("p".into()), None);
        creds.add_uid("p", UidRole::SourceCamera);
        let before = creds.uids().to_vec();

        for role in [
            None,
            Some(UidRole::Primary),
            Some(UidRole::SourceCamera),
            Some(UidRole::Other("x".into())),
        ] {
            assert!(!creds.remove_uid("p", role.as_ref()));
            assert_eq!(creds.uids(), before.as_slice());
        }
    }

    #[test]
    fn test_remove_uid_by_role() {
        let mut creds = SessionCredentials::new(Some("p".into()), None);
        creds.add_uid("cam", UidRole::SourceCamera);
        creds.add_uid("cam", UidRole::VirtualCamera);

        assert!(!creds.remove_uid("cam", Some(&UidRole::Other("viewer".into()))));
        assert!(creds.remove_uid("cam", Some(&UidRole::VirtualCamera)));
        assert_eq!(creds.roles_of("cam"), vec![UidRole::SourceCamera]);
        assert!(creds.remove_uid("cam", None));
        assert!(!creds.remove_uid("cam", None));
    }

    #[test]
    fn test_valid_requires_both_inputs() {
        let mut creds = SessionCredentials::new(Some("p".into()), Some("correct-otp-1".into()));
        creds.add_uid("cam", UidRole::SourceCamera);

        assert!(creds.valid("correct-otp-1", "p"));
        assert!(creds.valid("correct-otp-1", "cam"));
        assert!(!creds.valid("correct-otp-2", "cam"));
        assert!(!creds.valid("correct-otp-1", "stranger"));
        assert!(!creds.valid("correct-otp", "p"));
    }

    #[test]
    fn test_reset_collapses_roster() {
        let mut creds = SessionCredentials::new(Some("p".into()), Some("old-otp-value".into()));
        creds.add_uid("cam", UidRole::SourceCamera);

        creds.reset(Some("fresh".into()), Some("new-otp-value".into()));
        assert_eq!(creds.uids().len(), 1);
        assert_eq!(creds.primary_uid(), "fresh");
        assert_eq!(creds.otp(), "new-otp-value");
        assert!(!creds.valid("old-otp-value", "p"));

        creds.reset(None, None);
        assert_eq!(creds.uids().len(), 1);
        assert_ne!(creds.primary_uid(), "fresh");
    }

    #[test]
    fn test_debug_hides_otp() {
        let creds = SessionCredentials::new(None, Some("visible-secret".into()));
        assert!(!format!("{creds:?}").contains("visible-secret"));
    }
}
