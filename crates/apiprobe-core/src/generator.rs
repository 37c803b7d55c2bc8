//! Input generation for every probe strategy.
//!
//! All generators are pure given their seed and parameters. A fuzz input is
//! fully determined by `(category, seed, index)`, so any failing case in a
//! report can be regenerated byte-for-byte with [`fuzz_case`].

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::domain::{dedupe_ids, FuzzCategory, FuzzOrigin, Probe, Strategy};

/// Ordinary first names spanning several scripts and cultures.
const FUNCTIONAL_NAMES: &[&str] = &[
    "james", "maria", "mohammed", "yuki", "hans", "ingrid", "kwame", "priya",
];

/// Base name plus case variant; the service is expected to fold case.
const INTEGRATION_NAMES: &[&str] = &["john", "John", "maria", "MARIA"];

/// Names whose top prediction is tracked across runs.
const REGRESSION_NAMES: &[&str] = &["michael", "john", "maria"];

/// Polite-load rotation.
const LOAD_NAMES: &[&str] = &["john", "mary", "robert", "patricia", "michael"];

/// Stress lengths; one random name per length per batch.
pub const STRESS_LENGTHS: &[usize] = &[3, 5, 10, 20, 50];

/// Curated attack payloads for security probes.
const SECURITY_PAYLOADS: &[&str] = &[
    "' OR '1'='1",
    "\"); DROP TABLE users; --",
    "<script>alert('xss')</script>",
    "../../../etc/passwd",
    "1 UNION SELECT username, password FROM users",
    "<img src=x onerror=alert(1)>",
    "..%2F..%2F..%2Fetc%2Fpasswd",
];

const WHITESPACE_SAMPLES: &[&str] = &["", " ", "   ", "\t", " \n "];
const CONTROL_SAMPLES: &[&str] = &["\u{0}", "\u{1f}", "\u{7f}", "\n", "\t", "jo\u{0}hn", "\r\n"];
const NON_ASCII_SAMPLES: &[&str] = &[
    "名字", "Señor", "Café", "Zoë", "Ørjan", "Владимир", "محمد", "ゆき", "😀",
];
const MIXED_SAMPLES: &[&str] = &["name123", "123name", "j0hn", "m4ria"];
const INJECTION_SAMPLES: &[&str] = &[
    "' OR '1'='1",
    "; DROP TABLE users;",
    "<script>",
    "!@#$%^&*()",
    "\"); DROP TABLE users; --",
    "<b onmouseover=alert(1)>x</b>",
    "john\\nmaria",
    "\\t\\r",
];
const PERCENT_PHRASES: &[&str] = &["name with spaces", "jean-luc", "o'brien", "zoë", "a&b=c"];

/// Minimum length of an oversized input.
pub const OVERSIZED_MIN_LEN: usize = 1000;

/// Ordinary names for functional probes (deterministic).
pub fn functional_inputs() -> Vec<String> {
    to_owned(FUNCTIONAL_NAMES)
}

/// Case variants for integration probes (deterministic).
pub fn integration_inputs() -> Vec<String> {
    to_owned(INTEGRATION_NAMES)
}

/// Stable names for regression probes (deterministic).
pub fn regression_inputs() -> Vec<String> {
    to_owned(REGRESSION_NAMES)
}

/// Known attack-pattern strings (deterministic).
pub fn security_inputs() -> Vec<String> {
    to_owned(SECURITY_PAYLOADS)
}

/// Polite-load name rotation (deterministic).
pub fn load_inputs() -> Vec<String> {
    to_owned(LOAD_NAMES)
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Lowercase ASCII alphabetic string of exactly `length` chars.
pub fn random_name<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| char::from(b'a' + rng.gen_range(0..26u8)))
        .collect()
}

/// SplitMix64 finalizer, used to derive independent per-item seeds.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn item_rng(seed: u64, index: u64, salt: u64) -> StdRng {
    StdRng::seed_from_u64(mix(mix(seed ^ salt).wrapping_add(index)))
}

const CATEGORY_SALT: u64 = 0x6361_7465_676f_7279;
const CONTENT_SALT: u64 = 0x636f_6e74_656e_7400;

/// Category drawn for item `index` of the fuzz sequence seeded by `seed`.
pub fn fuzz_category(seed: u64, index: u64) -> FuzzCategory {
    let mut rng = item_rng(seed, index, CATEGORY_SALT);
    FuzzCategory::ALL[rng.gen_range(0..FuzzCategory::ALL.len())]
}

/// Regenerate one fuzz input from its replay coordinates.
pub fn fuzz_case(category: FuzzCategory, seed: u64, index: u64) -> String {
    let mut rng = item_rng(seed, index, CONTENT_SALT ^ category as u64);
    let use_sample = rng.gen_bool(0.5);

    match category {
        FuzzCategory::EmptyOrWhitespace => {
            if use_sample {
                pick(&mut rng, WHITESPACE_SAMPLES)
            } else {
                let len = rng.gen_range(1..=8);
                (0..len)
                    .map(|_| *[' ', '\t', '\n', '\r'].choose(&mut rng).unwrap_or(&' '))
                    .collect()
            }
        }
        FuzzCategory::ControlCharacters => {
            if use_sample {
                pick(&mut rng, CONTROL_SAMPLES)
            } else {
                let len = rng.gen_range(1..=8);
                (0..len)
                    .map(|i| {
                        // First char is always a control byte.
                        if i == 0 || rng.gen_bool(0.5) {
                            let code = rng.gen_range(0u32..0x20);
                            char::from_u32(code).unwrap_or('\u{0}')
                        } else if rng.gen_bool(0.2) {
                            '\u{7f}'
                        } else {
                            char::from(b'a' + rng.gen_range(0..26u8))
                        }
                    })
                    .collect()
            }
        }
        FuzzCategory::Oversized => {
            let len = OVERSIZED_MIN_LEN + rng.gen_range(0..=OVERSIZED_MIN_LEN);
            if use_sample {
                "a".repeat(len)
            } else {
                random_name(&mut rng, len)
            }
        }
        FuzzCategory::NonAscii => {
            if use_sample {
                pick(&mut rng, NON_ASCII_SAMPLES)
            } else {
                let parts = rng.gen_range(2..=3);
                (0..parts)
                    .map(|_| pick(&mut rng, NON_ASCII_SAMPLES))
                    .collect()
            }
        }
        FuzzCategory::NumericOnly => {
            if use_sample {
                "123".to_string()
            } else {
                let len = rng.gen_range(1..=12);
                (0..len)
                    .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                    .collect()
            }
        }
        FuzzCategory::MixedAlphanumeric => {
            if use_sample {
                pick(&mut rng, MIXED_SAMPLES)
            } else {
                const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
                let len = rng.gen_range(3..=16);
                (0..len)
                    .map(|_| char::from(ALNUM[rng.gen_range(0..ALNUM.len())]))
                    .collect()
            }
        }
        FuzzCategory::Injection => pick(&mut rng, INJECTION_SAMPLES),
        FuzzCategory::PercentEncoded => {
            let phrase = pick(&mut rng, PERCENT_PHRASES);
            percent_encode(&phrase)
        }
    }
}

fn pick<R: Rng + ?Sized>(rng: &mut R, items: &[&str]) -> String {
    items
        .choose(rng)
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// Encode every byte outside the RFC 3986 unreserved set as `%XX`.
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(char::from(byte))
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Lazy, seeded sequence of fuzz inputs.
#[derive(Debug, Clone)]
pub struct FuzzInputs {
    seed: u64,
    next: u64,
    end: u64,
}

impl Iterator for FuzzInputs {
    type Item = (FuzzOrigin, String);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let category = fuzz_category(self.seed, index);
        let origin = FuzzOrigin {
            category,
            seed: self.seed,
            index,
        };
        Some((origin, fuzz_case(category, self.seed, index)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FuzzInputs {}

/// Seeded input generator.
///
/// Owns its own RNG for random names; two generators built with the same seed
/// produce the same inputs in the same order.
#[derive(Debug, Clone)]
pub struct InputGenerator {
    seed: u64,
    name_rng: StdRng,
}

impl InputGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            name_rng: item_rng(seed, 0, 0x6e61_6d65),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// `n` fuzz inputs drawn with repetition from every category.
    pub fn fuzz_inputs(&self, n: usize) -> FuzzInputs {
        FuzzInputs {
            seed: self.seed,
            next: 0,
            end: n as u64,
        }
    }

    /// Random lowercase name; advances this generator's name stream.
    pub fn random_name(&mut self, length: usize) -> String {
        random_name(&mut self.name_rng, length)
    }

    /// One random name per stress length.
    pub fn stress_inputs(&mut self) -> Vec<String> {
        STRESS_LENGTHS
            .iter()
            .map(|&len| self.random_name(len))
            .collect()
    }

    /// Build the probes for one strategy.
    pub fn probes_for(&mut self, strategy: Strategy, fuzz_count: usize) -> Vec<Probe> {
        let mut probes: Vec<Probe> = match strategy {
            Strategy::Functional => functional_inputs()
                .into_iter()
                .map(|name| Probe::new(strategy, name))
                .collect(),
            Strategy::Integration => integration_inputs()
                .into_iter()
                .map(|name| Probe::new(strategy, name))
                .collect(),
            Strategy::Regression => regression_inputs()
                .into_iter()
                .map(|name| Probe::new(strategy, name))
                .collect(),
            Strategy::Security => security_inputs()
                .into_iter()
                .map(|payload| Probe::new(strategy, payload))
                .collect(),
            Strategy::Fuzz => self
                .fuzz_inputs(fuzz_count)
                .map(|(origin, input)| Probe::new(strategy, input).with_origin(origin))
                .collect(),
            Strategy::Load => {
                let mut names = load_inputs();
                names.extend(self.stress_inputs());
                names
                    .into_iter()
                    .map(|name| Probe::new(strategy, name))
                    .collect()
            }
        };
        dedupe_ids(&mut probes);
        probes
    }
}
