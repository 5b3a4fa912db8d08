use async_trait::async_trait;
use bloomfilter::Bloom;
use dashmap::DashSet;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::MembershipIndex;
use crate::errors::{OctolinkError, Result};

enum Backing {
    Bloom(RwLock<Bloom<str>>),
    /// 布隆过滤器无法构建时的精确集合
    Exact(DashSet<String>),
}

/// 进程内布隆过滤器
pub struct LocalBloomIndex {
    backing: Backing,
    capacity: u64,
    error_rate: f64,
}

impl LocalBloomIndex {
    pub fn new(capacity: u64, error_rate: f64) -> Self {
        let backing = match build_bloom(capacity, error_rate) {
            Ok(bloom) => Backing::Bloom(RwLock::new(bloom)),
            Err(e) => {
                warn!("{}; falling back to exact membership set", e);
                Backing::Exact(DashSet::new())
            }
        };
        Self {
            backing,
            capacity,
            error_rate,
        }
    }
}

fn build_bloom(capacity: u64, error_rate: f64) -> Result<Bloom<str>> {
    if capacity == 0 || !(error_rate > 0.0 && error_rate < 1.0) {
        return Err(OctolinkError::index_backend(format!(
            "cannot build bloom filter (capacity {}, fp rate {})",
            capacity, error_rate
        )));
    }
    let items = usize::try_from(capacity)
        .map_err(|_| OctolinkError::index_backend(format!("capacity {} too large", capacity)))?;
    Bloom::new_for_fp_rate(items, error_rate).map_err(|e| {
        OctolinkError::index_backend(format!(
            "cannot build bloom filter (capacity {}, fp rate {}): {}",
            capacity, error_rate, e
        ))
    })
}

#[async_trait]
impl MembershipIndex for LocalBloomIndex {
    async fn add(&self, code: &str) -> Result<()> {
        match &self.backing {
            Backing::Bloom(bloom) => bloom.write().set(code),
            Backing::Exact(set) => {
                set.insert(code.to_string());
            }
        }
        Ok(())
    }

    async fn bulk_add(&self, codes: &[String]) -> Result<()> {
        match &self.backing {
            Backing::Bloom(bloom) => {
                let mut bloom = bloom.write();
                for code in codes {
                    bloom.set(code.as_str());
                }
            }
            Backing::Exact(set) => {
                for code in codes {
                    set.insert(code.clone());
                }
            }
        }
        debug!("Bulk inserted {} codes into local index", codes.len());
        Ok(())
    }

    async fn exists(&self, code: &str) -> Result<bool> {
        Ok(match &self.backing {
            Backing::Bloom(bloom) => bloom.read().check(code),
            Backing::Exact(set) => set.contains(code),
        })
    }

    async fn is_available(&self) -> bool {
        matches!(self.backing, Backing::Bloom(_))
    }

    async fn reset(&self) -> Result<()> {
        match &self.backing {
            Backing::Bloom(bloom) => {
                *bloom.write() = build_bloom(self.capacity, self.error_rate)?;
            }
            Backing::Exact(set) => set.clear(),
        }
        debug!("Local membership index reset");
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
