//! Minimal perfect hash over the PID key set.
//!
//! Hash-and-displace construction: keys are scattered into small buckets by
//! a first keyed hash, then each bucket (largest first) searches for a
//! displacement that lands all of its keys on free slots of the `[0, n)`
//! position table. The result is a bijection from the key set onto `[0, n)`.
//! Keys outside the original set hash to an arbitrary ordinal; the
//! identifier index verifies the round-trip before trusting a lookup.

use std::fs::File;
use std::hash::Hasher;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use siphasher::sip::SipHasher13;

use crate::error::{GraphError, Result};

const MAGIC: &[u8; 8] = b"STRATMPH";
/// Average keys per bucket.
const BUCKET_LOAD: u64 = 4;
const MAX_DISPLACEMENT: u32 = 1 << 16;
const MAX_SEEDS: u64 = 64;

const BUCKET_KEY: u64 = 0x9e37_79b9_7f4a_7c15;
const POSITION_KEY: u64 = 0xc2b2_ae3d_27d4_eb4f;

pub struct Mph {
    seed: u64,
    num_keys: u64,
    displacements: Vec<u32>,
}

impl Mph {
    /// Number of keys the function was built over.
    pub fn num_keys(&self) -> u64 {
        self.num_keys
    }

    /// Builds the function over a set of distinct keys.
    pub fn build<K: AsRef<[u8]>>(keys: &[K]) -> Result<Mph> {
        let n = keys.len() as u64;
        if n == 0 {
            return Ok(Mph {
                seed: 0,
                num_keys: 0,
                displacements: Vec::new(),
            });
        }
        let num_buckets = n.div_ceil(BUCKET_LOAD);

        'seed: for seed in 0..MAX_SEEDS {
            let mut buckets: Vec<Vec<u64>> = vec![Vec::new(); num_buckets as usize];
            for key in keys {
                let (bucket, fingerprint) = hash_key(seed, key.as_ref(), num_buckets);
                buckets[bucket as usize].push(fingerprint);
            }

            let mut order: Vec<usize> = (0..buckets.len()).collect();
            order.sort_by_key(|&b| std::cmp::Reverse(buckets[b].len()));

            let mut occupied = vec![false; n as usize];
            let mut displacements = vec![0u32; num_buckets as usize];
            for &b in &order {
                let bucket = &buckets[b];
                if bucket.is_empty() {
                    continue;
                }
                let mut placed = Vec::with_capacity(bucket.len());
                let mut found = false;
                'displacement: for d in 0..MAX_DISPLACEMENT {
                    placed.clear();
                    for &fingerprint in bucket {
                        let pos = position(fingerprint, d, n) as usize;
                        if occupied[pos] || placed.contains(&pos) {
                            continue 'displacement;
                        }
                        placed.push(pos);
                    }
                    for &pos in &placed {
                        occupied[pos] = true;
                    }
                    displacements[b] = d;
                    found = true;
                    break;
                }
                if !found {
                    // A colliding bucket at this seed; retry the whole build.
                    continue 'seed;
                }
            }

            return Ok(Mph {
                seed,
                num_keys: n,
                displacements,
            });
        }
        Err(GraphError::Compression(
            "minimal perfect hash construction exhausted its seeds (duplicate keys?)".into(),
        ))
    }

    /// Hashes a key to its ordinal. For keys in the build set this is a
    /// bijection onto `[0, num_keys)`; any other key yields an arbitrary
    /// value in the same range.
    pub fn get(&self, key: &[u8]) -> u64 {
        if self.num_keys == 0 {
            return 0;
        }
        let num_buckets = self.displacements.len() as u64;
        let (bucket, fingerprint) = hash_key(self.seed, key, num_buckets);
        position(fingerprint, self.displacements[bucket as usize], self.num_keys)
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> Result<()> {
        out.write_all(MAGIC)?;
        out.write_all(&self.seed.to_le_bytes())?;
        out.write_all(&self.num_keys.to_le_bytes())?;
        out.write_all(&(self.displacements.len() as u64).to_le_bytes())?;
        for d in &self.displacements {
            out.write_all(&d.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut input: R) -> Result<Mph> {
        let mut magic = [0u8; 8];
        input.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(GraphError::ArtifactCorrupt("bad mph magic".into()));
        }
        let mut word = [0u8; 8];
        input.read_exact(&mut word)?;
        let seed = u64::from_le_bytes(word);
        input.read_exact(&mut word)?;
        let num_keys = u64::from_le_bytes(word);
        input.read_exact(&mut word)?;
        let num_buckets = u64::from_le_bytes(word);
        if num_keys > 0 && num_buckets != num_keys.div_ceil(BUCKET_LOAD) {
            return Err(GraphError::ArtifactCorrupt(
                "mph bucket count disagrees with key count".into(),
            ));
        }
        let mut displacements = vec![0u32; num_buckets as usize];
        let mut bytes = [0u8; 4];
        for d in displacements.iter_mut() {
            input.read_exact(&mut bytes)?;
            *d = u32::from_le_bytes(bytes);
        }
        Ok(Mph {
            seed,
            num_keys,
            displacements,
        })
    }

    pub fn load(path: &Path) -> Result<Mph> {
        Mph::read_from(BufReader::new(File::open(path)?))
    }
}

fn hash_key(seed: u64, key: &[u8], num_buckets: u64) -> (u64, u64) {
    let mut bucket_hasher = SipHasher13::new_with_keys(seed, BUCKET_KEY);
    bucket_hasher.write(key);
    let mut position_hasher = SipHasher13::new_with_keys(seed, POSITION_KEY);
    position_hasher.write(key);
    (
        bucket_hasher.finish() % num_buckets,
        position_hasher.finish(),
    )
}

fn position(fingerprint: u64, displacement: u32, n: u64) -> u64 {
    splitmix(fingerprint ^ splitmix(u64::from(displacement))) % n
}

fn splitmix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid::{NodeType, Pid};

    fn keys(count: u64) -> Vec<[u8; 50]> {
        (0..count)
            .map(|i| {
                let mut digest = [0u8; 20];
                digest[..8].copy_from_slice(&i.to_be_bytes());
                Pid::new(NodeType::Content, digest).to_str_bytes()
            })
            .collect()
    }

    #[test]
    fn bijective_on_key_set() {
        for count in [1u64, 2, 7, 64, 500] {
            let keys = keys(count);
            let mph = Mph::build(&keys).unwrap();
            let mut seen = vec![false; count as usize];
            for key in &keys {
                let ordinal = mph.get(key);
                assert!(ordinal < count);
                assert!(!seen[ordinal as usize], "collision at {ordinal}");
                seen[ordinal as usize] = true;
            }
        }
    }

    #[test]
    fn deterministic_build() {
        let keys = keys(100);
        let a = Mph::build(&keys).unwrap();
        let b = Mph::build(&keys).unwrap();
        for key in &keys {
            assert_eq!(a.get(key), b.get(key));
        }
    }

    #[test]
    fn serialization_roundtrip() {
        let keys = keys(200);
        let mph = Mph::build(&keys).unwrap();
        let mut buf = Vec::new();
        mph.write_to(&mut buf).unwrap();
        let loaded = Mph::read_from(buf.as_slice()).unwrap();
        assert_eq!(loaded.num_keys(), 200);
        for key in &keys {
            assert_eq!(mph.get(key), loaded.get(key));
        }
    }

    #[test]
    fn foreign_keys_stay_in_range() {
        let keys = keys(50);
        let mph = Mph::build(&keys).unwrap();
        let foreign = Pid::new(NodeType::Origin, [0xff; 20]).to_str_bytes();
        assert!(mph.get(&foreign) < 50);
    }
}
