//! 节点缓存
//!
//! 缓存节点的 props：每个"有向谓词键"（`>pred` 正向，`<pred` 反向）对应一个
//! 按排序键有序的三元组 ID 列表。列表中引用的三元组同时保存在三元组缓存里，
//! 带引用计数（一个节点类型的三元组最多被主语与宾语两个列表引用）。
//!
//! 容量满时随机选择一个槽位淘汰，脏节点先写回再替换。

use crate::error::{Error, Result};
use crate::types::{parse_datetime, Datum, DatumType, Direction, NodeId, Triple, TripleId, DATETIME_FORMAT};
use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use smallvec::SmallVec;
use std::collections::HashMap;

/// 默认缓存节点数
pub const DEFAULT_NODE_CACHE_SIZE: usize = 256;
/// 超过该数量的列表不再逐项缓存
pub const DEFAULT_LIST_THRESHOLD: usize = 8;
/// 超过该长度的字符串值使所在列表不再逐项缓存
pub const DEFAULT_MAX_CACHED_STRING: usize = 1024;

/// 节点脏状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Clean,
    Modified,
    /// 后端尚无对应行
    NewlyInserted,
}

/// 一个有向谓词下的三元组列表
#[derive(Debug, Clone, PartialEq)]
pub struct PropList {
    /// 三元组总数（列表未缓存时仍然准确）
    pub count: usize,
    /// 是否逐项缓存
    pub cached: bool,
    pub ids: SmallVec<[TripleId; 8]>,
}

impl PropList {
    fn new() -> Self {
        Self {
            count: 0,
            cached: true,
            ids: SmallVec::new(),
        }
    }
}

/// 缓存中的节点
#[derive(Debug, Clone)]
pub struct CachedNode {
    pub id: NodeId,
    pub props: IndexMap<String, PropList>,
    pub state: NodeState,
}

impl CachedNode {
    pub fn new(id: NodeId, state: NodeState) -> Self {
        Self {
            id,
            props: IndexMap::new(),
            state,
        }
    }

    fn touch(&mut self) {
        if self.state != NodeState::NewlyInserted {
            self.state = NodeState::Modified;
        }
    }
}

/// props 键：方向标记加谓词名
pub fn list_key(dir: Direction, pred: &str) -> String {
    format!("{}{}", dir.marker(), pred)
}

/// 拆分 props 键
pub fn split_key(key: &str) -> Option<(Direction, &str)> {
    let mut chars = key.chars();
    let dir = Direction::from_marker(chars.next()?)?;
    Some((dir, chars.as_str()))
}

#[derive(Debug, Clone)]
struct CachedTriple {
    triple: Triple,
    refs: u8,
}

/// 节点缓存与三元组缓存
#[derive(Debug)]
pub struct NodeCache {
    nodes: Vec<CachedNode>,
    index: HashMap<NodeId, usize>,
    triples: HashMap<TripleId, CachedTriple>,
    capacity: usize,
    list_threshold: usize,
    max_cached_string: usize,
}

impl NodeCache {
    pub fn new(capacity: usize, list_threshold: usize, max_cached_string: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity.min(1024)),
            index: HashMap::new(),
            triples: HashMap::new(),
            capacity: capacity.max(1),
            list_threshold,
            max_cached_string,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.capacity
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&CachedNode> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut CachedNode> {
        match self.index.get(&id) {
            Some(&i) => Some(&mut self.nodes[i]),
            None => None,
        }
    }

    /// 三元组缓存查找
    pub fn triple(&self, id: TripleId) -> Option<&Triple> {
        self.triples.get(&id).map(|c| &c.triple)
    }

    pub fn cached_triples(&self) -> usize {
        self.triples.len()
    }

    /// 节点 ID，从最近加入的开始
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().rev().map(|n| n.id).collect()
    }

    /// 随机选择一个淘汰对象，未满时返回 None
    pub fn pick_victim(&self) -> Option<NodeId> {
        if !self.is_full() || self.nodes.is_empty() {
            return None;
        }
        let slot = rand::thread_rng().gen_range(0..self.nodes.len());
        Some(self.nodes[slot].id)
    }

    /// 移出节点并释放其列表引用的三元组
    pub fn evict(&mut self, id: NodeId) -> Option<CachedNode> {
        let slot = self.index.remove(&id)?;
        let node = self.nodes.swap_remove(slot);
        if let Some(moved) = self.nodes.get(slot) {
            self.index.insert(moved.id, slot);
        }
        for list in node.props.values() {
            for tid in &list.ids {
                release(&mut self.triples, *tid);
            }
        }
        Some(node)
    }

    /// 加入节点及其已缓存列表中的三元组
    pub fn admit(&mut self, node: CachedNode, triples: Vec<Triple>) {
        self.index.insert(node.id, self.nodes.len());
        self.nodes.push(node);
        for triple in triples {
            retain(&mut self.triples, triple);
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.triples.clear();
    }

    /// 把三元组加入节点的有序列表，返回该谓词下的三元组数
    ///
    /// 位置由排序键决定，从尾部线性查找第一个更小的键。
    pub fn add_triple_to_node(&mut self, id: NodeId, triple: &Triple, dir: Direction) -> Result<usize> {
        let slot = *self
            .index
            .get(&id)
            .ok_or_else(|| Error::Internal(format!("节点 {} 不在缓存中", id)))?;
        let node = &mut self.nodes[slot];
        let list = node
            .props
            .entry(list_key(dir, &triple.pred))
            .or_insert_with(PropList::new);
        list.count += 1;

        if list.cached && (list.count > self.list_threshold || triple.ob.text_len() > self.max_cached_string) {
            for tid in std::mem::take(&mut list.ids) {
                release(&mut self.triples, tid);
            }
            list.cached = false;
        } else if list.cached {
            let ok = triple.order_key(dir);
            let triples = &self.triples;
            let pos = list.ids.iter().rposition(|tid| {
                triples
                    .get(tid)
                    .map(|c| c.triple.order_key(dir) < ok)
                    .unwrap_or(true)
            });
            match pos {
                Some(i) => list.ids.insert(i + 1, triple.id),
                None => list.ids.insert(0, triple.id),
            }
            retain(&mut self.triples, triple.clone());
        }

        let count = list.count;
        node.touch();
        Ok(count)
    }

    /// 从节点列表中移除三元组；计数归零时删除该键
    pub fn remove_triple_from_node(&mut self, id: NodeId, triple: &Triple, dir: Direction) -> Result<()> {
        let slot = *self
            .index
            .get(&id)
            .ok_or_else(|| Error::Internal(format!("节点 {} 不在缓存中", id)))?;
        let node = &mut self.nodes[slot];
        let key = list_key(dir, &triple.pred);
        if let Some(list) = node.props.get_mut(&key) {
            list.count = list.count.saturating_sub(1);
            if let Some(pos) = list.ids.iter().position(|tid| *tid == triple.id) {
                list.ids.remove(pos);
                release(&mut self.triples, triple.id);
            }
            if list.count == 0 {
                node.props.shift_remove(&key);
            }
        }
        node.touch();
        Ok(())
    }

    /// 序列化节点 props；props 为空时返回 None
    pub fn encode(&self, id: NodeId) -> Result<Option<String>> {
        let node = self
            .get(id)
            .ok_or_else(|| Error::Internal(format!("节点 {} 不在缓存中", id)))?;
        if node.props.is_empty() {
            return Ok(None);
        }
        let mut stored: IndexMap<&str, StoredProp> = IndexMap::with_capacity(node.props.len());
        for (key, list) in &node.props {
            let dir = split_key(key).map(|(d, _)| d).unwrap_or_default();
            let mut entries = Vec::with_capacity(list.ids.len());
            for tid in &list.ids {
                let triple = self
                    .triple(*tid)
                    .ok_or_else(|| Error::Internal(format!("三元组 {} 不在缓存中", tid)))?;
                entries.push(StoredTriple::from_triple(triple, dir));
            }
            stored.insert(
                key.as_str(),
                StoredProp {
                    n: list.count,
                    cached: list.cached,
                    l: entries,
                },
            );
        }
        Ok(Some(serde_json::to_string(&stored)?))
    }
}

fn retain(triples: &mut HashMap<TripleId, CachedTriple>, triple: Triple) {
    let max_refs = if triple.datatype() == DatumType::Node { 2 } else { 1 };
    match triples.get_mut(&triple.id) {
        Some(entry) => {
            entry.refs = (entry.refs + 1).min(max_refs);
            entry.triple = triple;
        }
        None => {
            triples.insert(triple.id, CachedTriple { triple, refs: 1 });
        }
    }
}

fn release(triples: &mut HashMap<TripleId, CachedTriple>, id: TripleId) {
    if let Some(entry) = triples.get_mut(&id) {
        if entry.refs > 1 {
            entry.refs -= 1;
        } else {
            triples.remove(&id);
        }
    }
}

// ==================== 序列化格式 ====================

#[derive(Debug, Serialize, Deserialize)]
struct StoredProp {
    n: usize,
    #[serde(rename = "c")]
    cached: bool,
    #[serde(default)]
    l: Vec<StoredTriple>,
}

/// 列表项：省略谓词、类型以及与节点自身重复的一端
#[derive(Debug, Serialize, Deserialize)]
struct StoredTriple {
    id: TripleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ob: Option<JsonValue>,
    ob_ok: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_ok: Option<i64>,
}

impl StoredTriple {
    fn from_triple(triple: &Triple, dir: Direction) -> Self {
        match dir {
            Direction::Forward => Self {
                id: triple.id,
                sub: None,
                ob: Some(datum_to_json(&triple.ob)),
                ob_ok: triple.ob_ok,
                sub_ok: triple.sub_ok,
            },
            Direction::Backward => Self {
                id: triple.id,
                sub: Some(triple.sub),
                ob: None,
                ob_ok: triple.ob_ok,
                sub_ok: triple.sub_ok,
            },
        }
    }

    fn into_triple(self, node: NodeId, pred: &str, dir: Direction, ty: DatumType) -> Result<Triple> {
        let (sub, ob) = match dir {
            Direction::Forward => {
                let ob = self
                    .ob
                    .as_ref()
                    .ok_or_else(|| corrupt(node))
                    .and_then(|v| datum_from_json(v, ty).ok_or_else(|| corrupt(node)))?;
                (node, ob)
            }
            Direction::Backward => (self.sub.ok_or_else(|| corrupt(node))?, Datum::Node(node)),
        };
        Ok(Triple {
            id: self.id,
            sub,
            pred: pred.to_string(),
            ob,
            ob_ok: self.ob_ok,
            sub_ok: if ty == DatumType::Node {
                Some(self.sub_ok.unwrap_or(self.id as i64))
            } else {
                None
            },
        })
    }
}

fn corrupt(node: NodeId) -> Error {
    Error::Internal(format!("节点 {} 的 props 已损坏", node))
}

fn datum_to_json(datum: &Datum) -> JsonValue {
    match datum {
        Datum::Node(id) => JsonValue::from(*id),
        Datum::Int(v) => JsonValue::from(*v),
        Datum::Float(v) => JsonValue::from(*v),
        Datum::String(s) => JsonValue::from(s.as_str()),
        Datum::DateTime(dt) => JsonValue::from(dt.format(DATETIME_FORMAT).to_string()),
    }
}

fn datum_from_json(value: &JsonValue, ty: DatumType) -> Option<Datum> {
    match ty {
        DatumType::Node => value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .map(Datum::Node),
        DatumType::Int => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .map(Datum::Int),
        DatumType::Float => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .map(Datum::Float),
        DatumType::String => Some(Datum::String(match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        })),
        DatumType::DateTime => value.as_str().and_then(parse_datetime).map(Datum::DateTime),
    }
}

/// 反序列化节点 props
///
/// `pred_type` 解析谓词类型；类型未知的列表按未缓存处理。
/// 返回节点与其已缓存列表中的三元组。
pub fn decode_node<F>(id: NodeId, json: &str, mut pred_type: F) -> Result<(CachedNode, Vec<Triple>)>
where
    F: FnMut(&str) -> Result<Option<DatumType>>,
{
    let stored: IndexMap<String, StoredProp> = if json.trim().is_empty() {
        IndexMap::new()
    } else {
        serde_json::from_str(json)?
    };
    let mut node = CachedNode::new(id, NodeState::Clean);
    let mut triples = Vec::new();
    for (key, prop) in stored {
        let (dir, pred) = split_key(&key).ok_or_else(|| corrupt(id))?;
        let ty = pred_type(pred)?;
        let mut list = PropList {
            count: prop.n,
            cached: prop.cached,
            ids: SmallVec::new(),
        };
        match ty {
            Some(ty) if prop.cached => {
                for entry in prop.l {
                    let triple = entry.into_triple(id, pred, dir, ty)?;
                    list.ids.push(triple.id);
                    triples.push(triple);
                }
            }
            _ => list.cached = false,
        }
        node.props.insert(key, list);
    }
    Ok((node, triples))
}
