//! Human-readable room slug generation.
//!
//! Slugs look like `brisk-otter-42`: adjective, animal, two digits.
//! The space is small on purpose (memorable URLs for a handful of
//! concurrent rooms); the registry retries on collision.

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "amber", "brisk", "calm", "dusky", "eager", "fuzzy", "gentle", "hazel",
    "ivory", "jolly", "keen", "lively", "mellow", "nimble", "olive", "plucky",
    "quiet", "rosy", "sunny", "tidy", "umber", "vivid", "witty", "zesty",
];

const ANIMALS: &[&str] = &[
    "otter", "heron", "lynx", "marmot", "puffin", "badger", "wren", "stoat",
    "gecko", "ibex", "jackal", "koala", "lemur", "magpie", "newt", "osprey",
    "panda", "quail", "raven", "seal", "tapir", "urchin", "vole", "walrus",
];

/// Generate a fresh slug from the supplied RNG.
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> String {
    // SliceRandom::choose only returns None on an empty slice.
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("brisk");
    let animal = ANIMALS.choose(rng).copied().unwrap_or("otter");
    let digits: u8 = rng.gen_range(10..100);
    format!("{adjective}-{animal}-{digits}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn slug_shape() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let slug = generate(&mut rng);
            let parts: Vec<&str> = slug.split('-').collect();
            assert_eq!(parts.len(), 3, "unexpected slug: {slug}");
            assert!(ADJECTIVES.contains(&parts[0]));
            assert!(ANIMALS.contains(&parts[1]));
            let digits: u8 = parts[2].parse().expect("numeric suffix");
            assert!((10..100).contains(&digits));
        }
    }

    #[test]
    fn slugs_vary() {
        let mut rng = rand::thread_rng();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(generate(&mut rng));
        }
        // 24 * 24 * 90 possible slugs; 200 draws should not collapse.
        assert!(seen.len() > 50);
    }
}
