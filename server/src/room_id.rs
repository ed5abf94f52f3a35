//! Human-typable room codes: `xxx-xxx-xxx` over an alphabet without look-alikes
//! (no `i`, `l`, `o`, `0`, `1`).

use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";
const GROUPS: usize = 3;
const GROUP_LEN: usize = 3;

pub fn random_room_id(rng: &mut impl Rng) -> String {
    let mut id = String::with_capacity(GROUPS * (GROUP_LEN + 1));
    for group in 0..GROUPS {
        if group > 0 {
            id.push('-');
        }
        for _ in 0..GROUP_LEN {
            id.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
        }
    }
    id
}

/// Canonical form of a user-typed code: trimmed, lowercase, separators mapped to
/// `-`, and a bare 9-character code grouped. Does not validate.
pub fn normalize_room_id(input: &str) -> String {
    let cleaned: String = input
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '_' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    if cleaned.len() == GROUPS * GROUP_LEN && !cleaned.contains('-') {
        let (a, rest) = cleaned.split_at(GROUP_LEN);
        let (b, c) = rest.split_at(GROUP_LEN);
        return format!("{}-{}-{}", a, b, c);
    }
    cleaned
}

pub fn is_valid_room_id(id: &str) -> bool {
    let groups: Vec<&str> = id.split('-').collect();
    groups.len() == GROUPS
        && groups
            .iter()
            .all(|g| g.len() == GROUP_LEN && g.bytes().all(|b| ALPHABET.contains(&b)))
}
