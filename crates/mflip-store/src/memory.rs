//! In-process store with Redis semantics, for tests and single-node runs.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};
use crate::store::{Pipeline, PipelineOp, Store};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    ZSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

type Data = HashMap<String, Entry>;

/// Shared in-memory store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Data>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Data> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        data.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
        data
    }

    /// Every live key, sorted. Handy in assertions.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn list_mut<'a>(data: &'a mut Data, key: &str) -> StoreResult<&'a mut VecDeque<String>> {
    let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::List(VecDeque::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::List(list) => Ok(list),
        _ => Err(StoreError::wrong_type(key)),
    }
}

fn set_mut<'a>(data: &'a mut Data, key: &str) -> StoreResult<&'a mut BTreeSet<String>> {
    let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::Set(BTreeSet::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Set(set) => Ok(set),
        _ => Err(StoreError::wrong_type(key)),
    }
}

fn zset_mut<'a>(data: &'a mut Data, key: &str) -> StoreResult<&'a mut HashMap<String, f64>> {
    let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::ZSet(HashMap::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::ZSet(zset) => Ok(zset),
        _ => Err(StoreError::wrong_type(key)),
    }
}

/// Drop a collection key once it is empty, as Redis does.
fn prune(data: &mut Data, key: &str) {
    let empty = match data.get(key).map(|e| &e.value) {
        Some(Value::List(l)) => l.is_empty(),
        Some(Value::Set(s)) => s.is_empty(),
        Some(Value::ZSet(z)) => z.is_empty(),
        _ => false,
    };
    if empty {
        data.remove(key);
    }
}

/// Resolve an inclusive Redis-style range against a collection length.
fn range_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

fn sorted_members(zset: &HashMap<String, f64>) -> Vec<String> {
    let mut members: Vec<(&String, &f64)> = zset.iter().collect();
    members.sort_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)));
    members.into_iter().map(|(m, _)| m.clone()).collect()
}

/// Redis glob subset: `*`, `?` and backslash escapes.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_from(&p, &t)
}

fn glob_match_from(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => (0..=t.len()).any(|skip| glob_match_from(&p[1..], &t[skip..])),
        Some('?') => !t.is_empty() && glob_match_from(&p[1..], &t[1..]),
        Some('\\') if p.len() > 1 => {
            t.first() == Some(&p[1]) && glob_match_from(&p[2..], &t[1..])
        }
        Some(c) => t.first() == Some(c) && glob_match_from(&p[1..], &t[1..]),
    }
}

fn apply(data: &mut Data, op: PipelineOp) -> StoreResult<()> {
    match op {
        PipelineOp::Set { key, value, ttl } => {
            data.insert(
                key,
                Entry {
                    value: Value::Str(value),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        }
        PipelineOp::Del { key } => {
            data.remove(&key);
        }
        PipelineOp::ZAdd { key, member, score } => {
            zset_mut(data, &key)?.insert(member, score);
        }
        PipelineOp::ZRem { key, member } => {
            if matches!(data.get(&key).map(|e| &e.value), Some(Value::ZSet(_))) {
                zset_mut(data, &key)?.remove(&member);
                prune(data, &key);
            }
        }
        PipelineOp::SAdd { key, member } => {
            set_mut(data, &key)?.insert(member);
        }
        PipelineOp::SRem { key, member } => {
            if matches!(data.get(&key).map(|e| &e.value), Some(Value::Set(_))) {
                set_mut(data, &key)?.remove(&member);
                prune(data, &key);
            }
        }
        PipelineOp::RPush { key, value } => {
            list_mut(data, &key)?.push_back(value);
        }
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.lock().get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let data = self.lock();
        Ok(keys
            .iter()
            .map(|k| match data.get(k).map(|e| &e.value) {
                Some(Value::Str(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        apply(
            &mut self.lock(),
            PipelineOp::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
        )
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock().contains_key(key))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        zset_mut(&mut self.lock(), key)?.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let data = self.lock();
        let members = match data.get(key).map(|e| &e.value) {
            None => return Ok(Vec::new()),
            Some(Value::ZSet(z)) => sorted_members(z),
            Some(_) => return Err(StoreError::wrong_type(key)),
        };
        Ok(match range_bounds(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let data = self.lock();
        let mut members = match data.get(key).map(|e| &e.value) {
            None => return Ok(Vec::new()),
            Some(Value::ZSet(z)) => sorted_members(z),
            Some(_) => return Err(StoreError::wrong_type(key)),
        };
        members.reverse();
        Ok(match range_bounds(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut data = self.lock();
        let removed = match data.get_mut(key).map(|e| &mut e.value) {
            None => false,
            Some(Value::ZSet(z)) => z.remove(member).is_some(),
            Some(_) => return Err(StoreError::wrong_type(key)),
        };
        prune(&mut data, key);
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        match self.lock().get(key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::ZSet(z)) => Ok(z.len() as u64),
            Some(_) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(set_mut(&mut self.lock(), key)?.insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut data = self.lock();
        let removed = match data.get_mut(key).map(|e| &mut e.value) {
            None => false,
            Some(Value::Set(s)) => s.remove(member),
            Some(_) => return Err(StoreError::wrong_type(key)),
        };
        prune(&mut data, key);
        Ok(removed)
    }

    async fn sscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        let data = self.lock();
        let members: Vec<&String> = match data.get(key).map(|e| &e.value) {
            None => return Ok((0, Vec::new())),
            Some(Value::Set(s)) => s.iter().collect(),
            Some(_) => return Err(StoreError::wrong_type(key)),
        };

        let from = cursor as usize;
        let to = (from + count.max(1)).min(members.len());
        let page = members
            .get(from..to)
            .unwrap_or_default()
            .iter()
            .filter(|m| pattern.map_or(true, |p| glob_match(p, m)))
            .map(|m| (*m).clone())
            .collect();
        let next = if to >= members.len() { 0 } else { to as u64 };
        Ok((next, page))
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        let mut data = self.lock();
        let list = list_mut(&mut data, key)?;
        list.push_back(value.to_string());
        Ok(list.len() as u64)
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut data = self.lock();
        let popped = match data.get_mut(key).map(|e| &mut e.value) {
            None => None,
            Some(Value::List(l)) => l.pop_front(),
            Some(_) => return Err(StoreError::wrong_type(key)),
        };
        prune(&mut data, key);
        Ok(popped)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let data = self.lock();
        let list = match data.get(key).map(|e| &e.value) {
            None => return Ok(Vec::new()),
            Some(Value::List(l)) => l,
            Some(_) => return Err(StoreError::wrong_type(key)),
        };
        Ok(match range_bounds(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<u64> {
        let mut data = self.lock();
        let list = match data.get_mut(key).map(|e| &mut e.value) {
            None => return Ok(0),
            Some(Value::List(l)) => l,
            Some(_) => return Err(StoreError::wrong_type(key)),
        };

        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() };
        let mut removed = 0usize;
        if count >= 0 {
            let mut i = 0;
            while i < list.len() && removed < limit {
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                }
            }
        }
        prune(&mut data, key);
        Ok(removed as u64)
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        match self.lock().get(key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::List(l)) => Ok(l.len() as u64),
            Some(_) => Err(StoreError::wrong_type(key)),
        }
    }

    async fn exec(&self, pipeline: Pipeline) -> StoreResult<()> {
        let mut data = self.lock();
        for op in pipeline.into_ops() {
            apply(&mut data, op)?;
        }
        Ok(())
    }
}
