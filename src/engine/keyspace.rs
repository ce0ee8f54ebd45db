// src/engine/keyspace.rs

//! 键空间：key -> ZSet 的并发映射。
//!
//! 写命令拿到对应分片的独占锁，读命令和快照拿共享锁。
//! 命令执行后若集合变空，key 会被移除，所以键空间里不存在空集合。

use dashmap::DashMap;

use crate::types::zset::ZSet;

#[derive(Default)]
pub struct Keyspace {
    sets: DashMap<Vec<u8>, ZSet>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// key 个数
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.sets.contains_key(key)
    }

    /// 只读访问；key 不存在时返回 `None`
    pub fn read<R>(&self, key: &[u8], f: impl FnOnce(&ZSet) -> R) -> Option<R> {
        self.sets.get(key).map(|set| f(set.value()))
    }

    /// 独占访问已存在的 key；key 不存在时返回 `None`
    pub fn write<R>(&self, key: &[u8], f: impl FnOnce(&mut ZSet) -> R) -> Option<R> {
        let out = {
            let mut set = self.sets.get_mut(key)?;
            f(set.value_mut())
        };
        self.drop_if_empty(key);
        Some(out)
    }

    /// 独占访问，不存在的 key 先建一个空集合
    pub fn upsert<R>(&self, key: &[u8], f: impl FnOnce(&mut ZSet) -> R) -> R {
        let out = {
            let mut set = self.sets.entry(key.to_vec()).or_default();
            f(set.value_mut())
        };
        self.drop_if_empty(key);
        out
    }

    // 分片锁已释放后再清理空集合，否则会在同一分片上死锁
    fn drop_if_empty(&self, key: &[u8]) {
        self.sets.remove_if(key, |_, set| set.is_empty());
    }

    /// 删除 key，返回是否存在
    pub fn remove(&self, key: &[u8]) -> bool {
        self.sets.remove(key).is_some()
    }

    /// 放入整个集合（加载快照时使用），空集合直接丢弃
    pub fn insert(&self, key: Vec<u8>, set: ZSet) {
        if set.is_empty() {
            return;
        }
        self.sets.insert(key, set);
    }

    /// 依次访问每个 key。回调期间持有该分片的读锁，不要在里面写键空间。
    pub fn for_each(&self, mut f: impl FnMut(&[u8], &ZSet)) {
        for entry in self.sets.iter() {
            f(entry.key(), entry.value());
        }
    }
}
