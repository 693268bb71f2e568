//! Hash-triggered redeployment.
//!
//! The deployment's identity is a hash over the ordered identifiers of the
//! gateway chain members. Recomputing with unchanged inputs reproduces the
//! value exactly; any member change forces a new deployment.

use sha2::{Digest, Sha256};

/// Deterministic trigger value over an ordered list of identifiers.
/// Pure and side-effect-free; separator bytes keep `["ab","c"]` distinct
/// from `["a","bc"]`.
pub fn trigger_hash<S: AsRef<str>>(ids: &[S]) -> String {
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_ref().as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: [&str; 5] = ["res-1", "met-1", "int-1", "mrs-1", "irs-1"];

    #[test]
    fn unchanged_inputs_reproduce_the_hash() {
        assert_eq!(trigger_hash(&CHAIN), trigger_hash(&CHAIN));
    }

    #[test]
    fn any_member_change_changes_the_hash() {
        let baseline = trigger_hash(&CHAIN);
        for index in 0..CHAIN.len() {
            let mut changed = CHAIN;
            changed[index] = "replaced";
            assert_ne!(
                trigger_hash(&changed),
                baseline,
                "member {index} should perturb the hash"
            );
        }
    }

    #[test]
    fn member_order_matters() {
        let mut swapped = CHAIN;
        swapped.swap(0, 1);
        assert_ne!(trigger_hash(&swapped), trigger_hash(&CHAIN));
    }

    #[test]
    fn concatenation_boundaries_are_unambiguous() {
        assert_ne!(trigger_hash(&["ab", "c"]), trigger_hash(&["a", "bc"]));
    }
}
