use {
    super::*,
    randomx_rs::{RandomXCache, RandomXFlag, RandomXVM},
    std::sync::Mutex,
};

/// A RandomX evaluator bound to a single 32-byte seed.
///
/// Construction allocates the RandomX cache and is CPU/memory heavy (light
/// mode, per §5 of the design doc); callers build one per job seed and reuse
/// it across every nonce sharing that seed rather than rebuilding it per
/// hash. `RandomXVM` is not `Sync` on its own, so calls are serialized behind
/// a mutex; a miner that wants per-core parallelism should build one `Vm` per
/// core rather than share a single instance across them.
pub struct Vm {
    inner: Mutex<RandomXVM>,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm").finish_non_exhaustive()
    }
}

impl Vm {
    /// Builds a RandomX virtual machine keyed to `seed`. Callers should run
    /// this inside `spawn_blocking`; full-dataset mode is not attempted here,
    /// matching the light-mode allowance in the design doc for low-memory
    /// hosts.
    pub fn new(seed: &[u8]) -> crate::Result<Self> {
        let flags = RandomXFlag::get_recommended_flags();

        let cache = RandomXCache::new(flags, seed)
            .map_err(|err| anyhow!("failed to initialize randomx cache: {err:?}"))?;

        let vm = RandomXVM::new(flags, Some(cache), None)
            .map_err(|err| anyhow!("failed to initialize randomx vm: {err:?}"))?;

        Ok(Self {
            inner: Mutex::new(vm),
        })
    }

    /// Evaluates RandomX over `input`, returning the 32-byte digest.
    pub fn hash(&self, input: &[u8]) -> crate::Result<[u8; 32]> {
        let vm = self
            .inner
            .lock()
            .map_err(|_| anyhow!("randomx vm mutex poisoned"))?;

        let digest = vm
            .calculate_hash(input)
            .map_err(|err| anyhow!("randomx hash failed: {err:?}"))?;

        digest
            .try_into()
            .map_err(|_| anyhow!("randomx digest was not 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_reference_test_vector() {
        // From the RandomX reference implementation's own test suite
        // (key="test key 000", input="This is a test"). Cross-check against
        // the reference vectors again before relying on this in production;
        // see the diff1-constant caveat in DESIGN.md for the same spirit.
        let vm = Vm::new(b"test key 000").unwrap();
        let digest = vm.hash(b"This is a test").unwrap();
        assert_eq!(
            hex::encode(digest),
            "639183aae1bf4c9a35884cb46b09cad9175f04efd7684e7262a0ac1c2f0b4e3f"
        );
    }

    #[test]
    fn hashes_are_deterministic_for_a_fixed_seed_and_input() {
        let vm = Vm::new(b"another seed").unwrap();
        let a = vm.hash(b"same input").unwrap();
        let b = vm.hash(b"same input").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_under_the_same_seed_diverge() {
        let vm = Vm::new(b"another seed").unwrap();
        let a = vm.hash(b"input one").unwrap();
        let b = vm.hash(b"input two").unwrap();
        assert_ne!(a, b);
    }
}
