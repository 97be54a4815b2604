// SPDX-License-Identifier: MPL-2.0

use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

static NON_ALNUM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

const SUFFIX_LEN: usize = 4;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Lowercase, collapse every run of non-alphanumerics to one `-`, trim dashes.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    NON_ALNUM_RE
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// `slugify(text)` plus a short base-36 suffix, e.g. `rust-weekly-k3x9`.
pub fn unique_slug(text: &str) -> String {
    let base = slugify(text);
    let suffix = suffix();
    if base.is_empty() {
        suffix
    } else {
        format!("{base}-{suffix}")
    }
}

fn suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}
