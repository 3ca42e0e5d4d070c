//! Deterministic API-key names.
//!
//! A user proves they intended to link a key by naming it after their
//! platform identity. The code is a truncated hash; it is not a secret and
//! only has to be stable.

use md5::{Digest, Md5};

use crate::{model::PlatformId, world::{WorldId, normalized_world_name}};

/// Public; only keeps codes stable across deployments.
const KEY_NAME_SALT: &str = "2Qztw0zRJ0F5ThRGet7161VhcHpcPHG0cwYAT2ziS9DrX0pO0iLHL104vJUs";

/// Length of the hex code embedded in a key name.
pub const KEY_CODE_LEN: usize = 16;

/// The 16-character upper-case hex code for a platform identity.
pub fn api_key_code(platform_user_id: &str) -> String {
  let mut hasher = Md5::new();
  hasher.update(KEY_NAME_SALT.as_bytes());
  hasher.update(platform_user_id.as_bytes());
  let mut code = hex::encode(hasher.finalize());
  code.truncate(KEY_CODE_LEN);
  code.make_ascii_uppercase();
  code
}

/// The full key name a user is asked to give their key:
/// `[WorldName][platform_id-]CODE`.
pub fn api_key_name(
  perspective: Option<WorldId>,
  platform_id: PlatformId,
  platform_user_id: &str,
) -> String {
  let mut name = String::new();
  if let Some(world) = perspective {
    name.push_str(&normalized_world_name(world));
  }
  if platform_id > 0 {
    name.push_str(&platform_id.to_string());
    name.push('-');
  }
  name.push_str(&api_key_code(platform_user_id));
  name
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn code_is_stable_upper_hex() {
    let a = api_key_code("user-1");
    assert_eq!(a, api_key_code("user-1"));
    assert_eq!(a.len(), KEY_CODE_LEN);
    assert!(a.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    assert_ne!(a, api_key_code("user-2"));
  }

  #[test]
  fn code_matches_names_already_given_to_keys() {
    assert_eq!(api_key_code("42"), "D5289D60111D3309");
    assert_eq!(api_key_code("user-1"), "DEEC1FB0E96A2795");
  }

  #[test]
  fn name_prefixes() {
    let code = api_key_code("42");
    assert_eq!(api_key_name(None, 0, "42"), code);
    assert_eq!(api_key_name(None, 3, "42"), format!("3-{code}"));
    assert_eq!(api_key_name(Some(2101), 3, "42"), format!("JadeSea3-{code}"));
  }
}
