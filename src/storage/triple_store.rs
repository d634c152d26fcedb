//! 有序三元组存储
//!
//! 在 [`Backend`] 之上维护节点缓存、三元组缓存与谓词类型：
//! - 每次三元组变更都同步到主语节点（以及节点类型宾语的反向列表）
//! - 排序键在插入或移动时只在被占用的连续区间内向下腾挪
//! - 写操作必须在 `start_writing` 与 `commit`/`rollback` 之间进行

use crate::error::{Error, Result};
use crate::metrics;
use crate::storage::backend::{Backend, NodeRow, TripleFilter};
use crate::storage::node_cache::{
    decode_node, list_key, split_key, CachedNode, NodeCache, NodeState, DEFAULT_LIST_THRESHOLD,
    DEFAULT_MAX_CACHED_STRING, DEFAULT_NODE_CACHE_SIZE,
};
use crate::storage::predicates::PredicateRegistry;
use crate::types::{Datum, DatumType, Direction, NodeId, Triple, TripleId};
use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, info};

/// 保留谓词名
const RESERVED_PRED: &str = "id";

/// 存储选项
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub node_cache_size: usize,
    pub list_threshold: usize,
    pub max_cached_string: usize,
    pub read_only: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            node_cache_size: DEFAULT_NODE_CACHE_SIZE,
            list_threshold: DEFAULT_LIST_THRESHOLD,
            max_cached_string: DEFAULT_MAX_CACHED_STRING,
            read_only: false,
        }
    }
}

enum ListLookup {
    Absent,
    Cached(SmallVec<[TripleId; 8]>),
    Uncached,
}

/// 有序三元组存储
pub struct TripleStore {
    backend: Box<dyn Backend>,
    cache: NodeCache,
    preds: PredicateRegistry,
    writing: bool,
    read_only: bool,
}

impl TripleStore {
    pub fn new(backend: Box<dyn Backend>, options: StoreOptions) -> Self {
        Self {
            backend,
            cache: NodeCache::new(
                options.node_cache_size,
                options.list_threshold,
                options.max_cached_string,
            ),
            preds: PredicateRegistry::new(),
            writing: false,
            read_only: options.read_only,
        }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    // ==================== 事务 ====================

    pub fn is_writing(&self) -> bool {
        self.writing
    }

    pub fn start_writing(&mut self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.reset_caches();
        self.backend.write_start()?;
        self.writing = true;
        Ok(())
    }

    /// 写回所有脏节点并提交；任何失败都会先回滚再返回错误
    pub fn commit(&mut self) -> Result<()> {
        let result = self.flush_all().and_then(|_| self.backend.write_end(true));
        match result {
            Ok(()) => {
                self.writing = false;
                self.reset_caches();
                Ok(())
            }
            Err(e) => {
                let _ = self.rollback();
                Err(e)
            }
        }
    }

    pub fn rollback(&mut self) -> Result<()> {
        let result = self.backend.write_end(false);
        self.writing = false;
        self.reset_caches();
        result
    }

    fn reset_caches(&mut self) {
        self.cache.clear();
        self.preds.clear();
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writing {
            Ok(())
        } else {
            Err(Error::NotWritable)
        }
    }

    fn flush_all(&mut self) -> Result<()> {
        for id in self.cache.node_ids() {
            self.save_node(id)?;
        }
        Ok(())
    }

    // ==================== 谓词类型 ====================

    pub fn pred_type(&mut self, name: &str) -> Result<Option<DatumType>> {
        self.preds.get(self.backend.as_ref(), name)
    }

    /// 绑定或迁移谓词类型
    ///
    /// 非写模式下只改内存绑定。写模式下若已绑定为其他类型，
    /// 旧表中该谓词的全部三元组会逐个转换后移入新表。
    pub fn set_pred_type(&mut self, name: &str, ty: DatumType) -> Result<()> {
        let current = self.pred_type(name)?;
        if !self.writing {
            self.preds.rebind(name, ty);
            return Ok(());
        }
        match current {
            None => self.preds.bind(self.backend.as_ref(), name, ty),
            Some(old) if old == ty => Ok(()),
            Some(old) => self.migrate(name, old, ty),
        }
    }

    fn migrate(&mut self, name: &str, old: DatumType, ty: DatumType) -> Result<()> {
        self.preds.rewrite(self.backend.as_ref(), name, ty)?;
        let triples = self
            .backend
            .triple_list(&[old], &TripleFilter::predicate(name))?;
        info!(predicate = name, from = %old, to = %ty, count = triples.len(), "迁移谓词类型");
        let count = triples.len() as u64;
        for triple in triples {
            self.detach(&triple)?;
            let mut migrated = triple.clone();
            migrated.ob = triple.ob.cast(ty)?;
            migrated.sub_ok = if ty == DatumType::Node {
                Some(migrated.id as i64)
            } else {
                None
            };
            self.attach(&migrated)?;
            self.backend.insert_triple(&migrated)?;
            self.backend.remove_triple(migrated.id, old)?;
            self.flush_new_nodes(&migrated)?;
        }
        metrics::global_metrics().record_triple_migrated(count);
        Ok(())
    }

    // ==================== 节点缓存 ====================

    fn load_node(&mut self, id: NodeId) -> Result<()> {
        if self.cache.contains(id) {
            metrics::global_metrics().record_node_hit();
            return Ok(());
        }
        if id == 0 {
            return Err(Error::InvalidReference("节点 ID 不能为 0".to_string()));
        }
        metrics::global_metrics().record_node_miss();
        let (node, triples) = match self.backend.load_node(id)? {
            Some(json) => self.decode(id, &json)?,
            None => {
                let state = if self.writing {
                    NodeState::NewlyInserted
                } else {
                    NodeState::Clean
                };
                (CachedNode::new(id, state), Vec::new())
            }
        };
        self.admit(node, triples)
    }

    fn decode(&mut self, id: NodeId, json: &str) -> Result<(CachedNode, Vec<Triple>)> {
        let backend = self.backend.as_ref();
        let preds = &mut self.preds;
        decode_node(id, json, |pred| preds.get(backend, pred))
    }

    fn admit(&mut self, node: CachedNode, triples: Vec<Triple>) -> Result<()> {
        if let Some(victim) = self.cache.pick_victim() {
            self.save_node(victim)?;
            self.cache.evict(victim);
            metrics::global_metrics().record_eviction();
            debug!(node = victim, "节点缓存淘汰");
        }
        self.cache.admit(node, triples);
        Ok(())
    }

    /// 用查询结果中的 props 预热缓存；写模式下不做任何事
    pub fn cache_node(&mut self, id: NodeId, props: &str) -> Result<()> {
        if self.writing || self.cache.contains(id) {
            return Ok(());
        }
        let (node, triples) = self.decode(id, props)?;
        self.admit(node, triples)
    }

    fn save_node(&mut self, id: NodeId) -> Result<()> {
        let state = match self.cache.get(id) {
            Some(node) => node.state,
            None => return Ok(()),
        };
        if state == NodeState::Clean {
            return Ok(());
        }
        match self.cache.encode(id)? {
            Some(json) if state == NodeState::NewlyInserted => self.backend.insert_node(id, &json)?,
            Some(json) => self.backend.update_node(id, &json)?,
            None => self.backend.remove_node(id)?,
        }
        if let Some(node) = self.cache.get_mut(id) {
            node.state = NodeState::Clean;
        }
        metrics::global_metrics().record_dirty_write();
        debug!(node = id, "节点写回");
        Ok(())
    }

    /// 新节点立即落行
    fn flush_new_nodes(&mut self, triple: &Triple) -> Result<()> {
        let mut ids: SmallVec<[NodeId; 2]> = SmallVec::new();
        ids.push(triple.sub);
        if let Datum::Node(ob) = triple.ob {
            ids.push(ob);
        }
        for id in ids {
            if self.cache.get(id).map(|n| n.state) == Some(NodeState::NewlyInserted) {
                self.save_node(id)?;
            }
        }
        Ok(())
    }

    /// 把三元组挂到主语（以及节点宾语）的列表上
    fn attach(&mut self, triple: &Triple) -> Result<usize> {
        self.load_node(triple.sub)?;
        let count = self.cache.add_triple_to_node(triple.sub, triple, Direction::Forward)?;
        if let Datum::Node(ob) = triple.ob {
            self.load_node(ob)?;
            self.cache.add_triple_to_node(ob, triple, Direction::Backward)?;
        }
        Ok(count)
    }

    fn detach(&mut self, triple: &Triple) -> Result<()> {
        self.load_node(triple.sub)?;
        self.cache.remove_triple_from_node(triple.sub, triple, Direction::Forward)?;
        if let Datum::Node(ob) = triple.ob {
            self.load_node(ob)?;
            self.cache.remove_triple_from_node(ob, triple, Direction::Backward)?;
        }
        Ok(())
    }

    fn lookup_list(&mut self, id: NodeId, dir: Direction, pred: &str) -> Result<ListLookup> {
        self.load_node(id)?;
        let node = self
            .cache
            .get(id)
            .ok_or_else(|| Error::Internal(format!("节点 {} 加载失败", id)))?;
        Ok(match node.props.get(&list_key(dir, pred)) {
            None => ListLookup::Absent,
            Some(list) if list.cached => ListLookup::Cached(list.ids.clone()),
            Some(_) => ListLookup::Uncached,
        })
    }

    // ==================== 三元组读写 ====================

    /// 分配新的节点 ID
    pub fn new_node_id(&mut self) -> Result<NodeId> {
        self.ensure_writable()?;
        self.backend.new_id(None)
    }

    /// 插入三元组，可指定插在某个宾语三元组或主语三元组之前
    pub fn insert(
        &mut self,
        sub: NodeId,
        pred: &str,
        ob: Datum,
        before_ob: Option<TripleId>,
        before_sub: Option<TripleId>,
    ) -> Result<TripleId> {
        if pred == RESERVED_PRED {
            return Err(Error::InvalidName(format!("{} 是保留名", pred)));
        }
        self.ensure_writable()?;
        let ty = ob.datatype();
        match self.pred_type(pred)? {
            None => self.set_pred_type(pred, ty)?,
            Some(declared) if declared != ty => {
                return Err(Error::TypeConflict {
                    predicate: pred.to_string(),
                    declared: declared.to_string(),
                    actual: ty.to_string(),
                })
            }
            Some(_) => {}
        }

        let id = self.backend.new_id(Some(pred))?;
        let mut triple = Triple {
            id,
            sub,
            pred: pred.to_string(),
            ob,
            ob_ok: id as i64,
            sub_ok: None,
        };
        if let Some(before) = before_ob {
            if let Some(reference) = self.get_triple(before, Some(pred))? {
                let ok = reference.ob_ok - 1;
                self.make_space_for_object(reference.sub, pred, ty, ok)?;
                triple.ob_ok = ok;
            }
        }
        if ty == DatumType::Node {
            triple.sub_ok = Some(id as i64);
            if let Some(before) = before_sub {
                if let Some(reference) = self.get_triple(before, Some(pred))? {
                    if let (Datum::Node(ref_ob), Some(ref_ok)) = (&reference.ob, reference.sub_ok) {
                        self.make_space_for_subject(*ref_ob, pred, ref_ok - 1)?;
                        triple.sub_ok = Some(ref_ok - 1);
                    }
                }
            }
        }

        self.attach(&triple)?;
        self.backend.insert_triple(&triple)?;
        self.flush_new_nodes(&triple)?;
        metrics::global_metrics().record_triple_insert();
        Ok(id)
    }

    /// 删除三元组，不存在时返回 false
    pub fn remove(&mut self, id: TripleId, pred: Option<&str>) -> Result<bool> {
        self.ensure_writable()?;
        let Some(triple) = self.get_triple(id, pred)? else {
            return Ok(false);
        };
        self.detach(&triple)?;
        self.backend.remove_triple(id, triple.datatype())?;
        self.backend.remove_triple_predicate(id)?;
        metrics::global_metrics().record_triple_remove();
        Ok(true)
    }

    /// 修改三元组的主语、谓词或宾语，排序键保持不变
    pub fn update(
        &mut self,
        id: TripleId,
        sub: Option<NodeId>,
        pred: Option<&str>,
        ob: Option<Datum>,
    ) -> Result<()> {
        self.ensure_writable()?;
        let Some(old) = self.get_triple(id, None)? else {
            return Ok(());
        };
        let sub = sub.unwrap_or(old.sub);
        let pred = pred.unwrap_or(&old.pred).to_string();
        let ob = ob.unwrap_or_else(|| old.ob.clone());
        if sub == old.sub && pred == old.pred && ob == old.ob {
            return Ok(());
        }
        if pred == RESERVED_PRED {
            return Err(Error::InvalidName(format!("{} 是保留名", pred)));
        }
        let ty = ob.datatype();
        match self.pred_type(&pred)? {
            None => self.set_pred_type(&pred, ty)?,
            Some(declared) if declared != ty => {
                return Err(Error::TypeConflict {
                    predicate: pred.clone(),
                    declared: declared.to_string(),
                    actual: ty.to_string(),
                })
            }
            Some(_) => {}
        }
        let updated = Triple {
            id,
            sub,
            pred: pred.clone(),
            ob,
            ob_ok: old.ob_ok,
            sub_ok: if ty == DatumType::Node {
                Some(old.sub_ok.unwrap_or(id as i64))
            } else {
                None
            },
        };

        self.detach(&old)?;
        self.attach(&updated)?;
        if old.datatype() != ty {
            self.backend.remove_triple(id, old.datatype())?;
            self.backend.insert_triple(&updated)?;
        } else {
            self.backend.update_triple(&updated)?;
        }
        if pred != old.pred {
            self.backend.update_triple_predicate(id, &pred)?;
        }
        self.flush_new_nodes(&updated)
    }

    /// 按 ID 取三元组，优先查缓存
    pub fn get_triple(&mut self, id: TripleId, pred: Option<&str>) -> Result<Option<Triple>> {
        if let Some(triple) = self.cache.triple(id) {
            return Ok(Some(triple.clone()));
        }
        if let Some(pred) = pred {
            if let Some(ty) = self.pred_type(pred)? {
                if let Some(triple) = self.backend.load_triple(id, ty)? {
                    if triple.pred == pred {
                        return Ok(Some(triple));
                    }
                }
            }
        }
        let Some(pred) = self.backend.triple_predicate(id)? else {
            return Ok(None);
        };
        match self.pred_type(&pred)? {
            Some(ty) => self.backend.load_triple(id, ty),
            None => Ok(None),
        }
    }

    fn resolve(&mut self, ids: &[TripleId], ob: Option<&Datum>) -> Result<Vec<Triple>> {
        let mut triples = Vec::with_capacity(ids.len());
        for id in ids {
            let triple = match self.cache.triple(*id) {
                Some(t) => t.clone(),
                None => match self.get_triple(*id, None)? {
                    Some(t) => t,
                    None => continue,
                },
            };
            if ob.map_or(true, |ob| *ob == triple.ob) {
                triples.push(triple);
            }
        }
        Ok(triples)
    }

    /// 按主语/谓词/宾语查询三元组，结果有序
    ///
    /// 给出主语与谓词时优先使用节点的缓存列表。
    pub fn get_triples(
        &mut self,
        sub: Option<NodeId>,
        pred: Option<&str>,
        ob: Option<&Datum>,
    ) -> Result<Vec<Triple>> {
        let filter = TripleFilter {
            sub,
            pred,
            ob,
            ..Default::default()
        };
        if let Some(pred) = pred {
            if let Some(sub) = sub {
                match self.lookup_list(sub, Direction::Forward, pred)? {
                    ListLookup::Absent => return Ok(Vec::new()),
                    ListLookup::Cached(ids) => return self.resolve(&ids, ob),
                    ListLookup::Uncached => {}
                }
            } else if let Some(Datum::Node(target)) = ob {
                match self.lookup_list(*target, Direction::Backward, pred)? {
                    ListLookup::Absent => return Ok(Vec::new()),
                    ListLookup::Cached(ids) => return self.resolve(&ids, None),
                    ListLookup::Uncached => {}
                }
            }
            return match self.pred_type(pred)? {
                Some(ty) => self.backend.triple_list(&[ty], &filter),
                None => Ok(Vec::new()),
            };
        }

        let types: Vec<DatumType> = match (sub, ob) {
            (_, Some(ob)) => vec![ob.datatype()],
            (Some(sub), None) => {
                let preds: Vec<String> = self
                    .node_predicates(sub, Some(Direction::Forward))?
                    .into_keys()
                    .collect();
                let mut types = Vec::new();
                for pred in preds {
                    if let Some(ty) = self.pred_type(&pred)? {
                        if !types.contains(&ty) {
                            types.push(ty);
                        }
                    }
                }
                types
            }
            (None, None) => DatumType::ALL.to_vec(),
        };
        self.backend.triple_list(&types, &filter)
    }

    /// 同一 (主语, 谓词) 下排在给定三元组之后的三元组
    pub fn next_object_triple_id(&mut self, id: TripleId, pred: Option<&str>) -> Result<Option<TripleId>> {
        match self.get_triple(id, pred)? {
            Some(triple) => self.backend.next_object_triple_id(&triple),
            None => Ok(None),
        }
    }

    /// 同一 (宾语, 谓词) 下排在给定三元组之后的三元组
    pub fn next_subject_triple_id(&mut self, id: TripleId, pred: Option<&str>) -> Result<Option<TripleId>> {
        match self.get_triple(id, pred)? {
            Some(triple) => self.backend.next_subject_triple_id(&triple),
            None => Ok(None),
        }
    }

    // ==================== 排序键 ====================

    /// 把三元组移到 `reference` 之前；没有参照时移到末尾
    pub fn move_before_object(
        &mut self,
        reference: Option<TripleId>,
        id: TripleId,
        pred: Option<&str>,
    ) -> Result<()> {
        self.ensure_writable()?;
        let Some(triple) = self.get_triple(id, pred)? else {
            return Ok(());
        };
        let ty = triple.datatype();
        let target = match reference {
            Some(r) if r == id => return Ok(()),
            Some(r) => match self.get_triple(r, Some(&triple.pred))? {
                Some(reference) => {
                    let ok = reference.ob_ok - 1;
                    self.make_space_for_object(triple.sub, &triple.pred, ty, ok)?;
                    ok
                }
                None => return Ok(()),
            },
            None => match self.backend.last_ob_ok(triple.sub, &triple.pred, ty)? {
                Some(last) if last == triple.ob_ok => return Ok(()),
                Some(_) => self.fresh_order_key()?,
                None => return Ok(()),
            },
        };
        if let Some(current) = self.get_triple(id, Some(&triple.pred))? {
            self.update_ob_ok(current, target)?;
        }
        Ok(())
    }

    /// 反向列表上的 [`move_before_object`](Self::move_before_object)
    pub fn move_before_subject(
        &mut self,
        reference: Option<TripleId>,
        id: TripleId,
        pred: Option<&str>,
    ) -> Result<()> {
        self.ensure_writable()?;
        let Some(triple) = self.get_triple(id, pred)? else {
            return Ok(());
        };
        let (Datum::Node(ob), Some(sub_ok)) = (&triple.ob, triple.sub_ok) else {
            return Ok(());
        };
        let ob = *ob;
        let target = match reference {
            Some(r) if r == id => return Ok(()),
            Some(r) => match self.get_triple(r, Some(&triple.pred))? {
                Some(Triple {
                    sub_ok: Some(ref_ok), ..
                }) => {
                    let ok = ref_ok - 1;
                    self.make_space_for_subject(ob, &triple.pred, ok)?;
                    ok
                }
                _ => return Ok(()),
            },
            None => match self.backend.last_sub_ok(ob, &triple.pred, DatumType::Node)? {
                Some(last) if last == sub_ok => return Ok(()),
                Some(_) => self.fresh_order_key()?,
                None => return Ok(()),
            },
        };
        if let Some(current) = self.get_triple(id, Some(&triple.pred))? {
            self.update_sub_ok(current, target)?;
        }
        Ok(())
    }

    /// 大于所有现有排序键的新键，取自 ID 序列
    fn fresh_order_key(&mut self) -> Result<i64> {
        let key = self.backend.new_id(None)?;
        self.backend.remove_triple_predicate(key)?;
        Ok(key as i64)
    }

    fn update_ob_ok(&mut self, triple: Triple, ok: i64) -> Result<()> {
        self.detach(&triple)?;
        let mut moved = triple;
        moved.ob_ok = ok;
        self.attach(&moved)?;
        self.backend.update_triple(&moved)
    }

    fn update_sub_ok(&mut self, triple: Triple, ok: i64) -> Result<()> {
        self.detach(&triple)?;
        let mut moved = triple;
        moved.sub_ok = Some(ok);
        self.attach(&moved)?;
        self.backend.update_triple(&moved)
    }

    /// 腾出 (sub, pred) 下的排序键 `ok`
    ///
    /// 占用 `ok` 的三元组移到 `ok - 1`，若 `ok - 1` 也被占用则先腾出它，
    /// 只移动从 `ok` 向下连续被占用的那一段。
    fn make_space_for_object(&mut self, sub: NodeId, pred: &str, ty: DatumType, ok: i64) -> Result<()> {
        loop {
            let mut run = Vec::new();
            let mut key = ok;
            while let Some(occupant) = self.object_at(sub, pred, ty, key)? {
                run.push(occupant);
                key -= 1;
            }
            if run.is_empty() {
                return Ok(());
            }
            for occupant in run.into_iter().rev() {
                let target = occupant.ob_ok - 1;
                self.update_ob_ok(occupant, target)?;
            }
        }
    }

    fn make_space_for_subject(&mut self, ob: NodeId, pred: &str, ok: i64) -> Result<()> {
        loop {
            let mut run = Vec::new();
            let mut key = ok;
            while let Some(occupant) = self.subject_at(ob, pred, key)? {
                run.push(occupant);
                key -= 1;
            }
            if run.is_empty() {
                return Ok(());
            }
            for occupant in run.into_iter().rev() {
                let target = occupant.sub_ok.unwrap_or(occupant.id as i64) - 1;
                self.update_sub_ok(occupant, target)?;
            }
        }
    }

    fn object_at(&self, sub: NodeId, pred: &str, ty: DatumType, ok: i64) -> Result<Option<Triple>> {
        let filter = TripleFilter::subject(sub).with_pred(pred).with_ob_ok(ok);
        Ok(self.backend.triple_list(&[ty], &filter)?.into_iter().next())
    }

    fn subject_at(&self, ob: NodeId, pred: &str, ok: i64) -> Result<Option<Triple>> {
        let target = Datum::Node(ob);
        let filter = TripleFilter::predicate(pred).with_ob(&target).with_sub_ok(ok);
        Ok(self
            .backend
            .triple_list(&[DatumType::Node], &filter)?
            .into_iter()
            .next())
    }

    // ==================== 节点概览 ====================

    /// 节点的谓词及其三元组数；反向谓词带 `@` 前缀
    pub fn node_predicates(&mut self, id: NodeId, dir: Option<Direction>) -> Result<IndexMap<String, usize>> {
        self.load_node(id)?;
        let node = self
            .cache
            .get(id)
            .ok_or_else(|| Error::Internal(format!("节点 {} 加载失败", id)))?;
        let mut result = IndexMap::new();
        for (key, list) in &node.props {
            let Some((d, pred)) = split_key(key) else { continue };
            if dir.map_or(true, |want| want == d) {
                result.insert(format!("{}{}", d.prefix(), pred), list.count);
            }
        }
        Ok(result)
    }

    /// 节点在某个有向谓词下的三元组数
    pub fn node_pred_cardinality(&mut self, id: NodeId, pred: &str, dir: Direction) -> Result<usize> {
        self.load_node(id)?;
        Ok(self
            .cache
            .get(id)
            .and_then(|n| n.props.get(&list_key(dir, pred)))
            .map(|l| l.count)
            .unwrap_or(0))
    }

    /// 节点是否有任何三元组
    pub fn node_exists(&mut self, id: NodeId) -> Result<bool> {
        if id == 0 {
            return Ok(false);
        }
        self.load_node(id)?;
        Ok(self.cache.get(id).map_or(false, |n| !n.props.is_empty()))
    }

    // ==================== 查询执行 ====================

    pub fn select_nodes(&self, sql: &str, params: &[Datum]) -> Result<Vec<NodeRow>> {
        self.backend.select_nodes(sql, params)
    }

    pub fn cached_nodes(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteBackend;

    fn store_with(options: StoreOptions) -> TripleStore {
        TripleStore::new(Box::new(SqliteBackend::open_in_memory("").unwrap()), options)
    }

    fn store() -> TripleStore {
        store_with(StoreOptions::default())
    }

    fn text(s: &str) -> Datum {
        Datum::String(s.to_string())
    }

    fn objects(store: &mut TripleStore, sub: NodeId, pred: &str) -> Vec<String> {
        store
            .get_triples(Some(sub), Some(pred), None)
            .unwrap()
            .into_iter()
            .map(|t| t.ob.to_string())
            .collect()
    }

    #[test]
    fn test_write_requires_transaction() {
        let mut store = store();
        assert!(matches!(
            store.insert(1, "name", text("a"), None, None),
            Err(Error::NotWritable)
        ));
        store.start_writing().unwrap();
        assert!(matches!(
            store.insert(1, "id", text("a"), None, None),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_read_only_store() {
        let mut store = store_with(StoreOptions {
            read_only: true,
            ..Default::default()
        });
        assert!(matches!(store.start_writing(), Err(Error::ReadOnly)));
    }

    #[test]
    fn test_insert_order_and_type_conflict() {
        let mut store = store();
        store.start_writing().unwrap();
        let node = store.new_node_id().unwrap();
        for v in ["a", "b", "c"] {
            store.insert(node, "tag", text(v), None, None).unwrap();
        }
        assert_eq!(objects(&mut store, node, "tag"), vec!["a", "b", "c"]);
        assert!(matches!(
            store.insert(node, "tag", Datum::Int(1), None, None),
            Err(Error::TypeConflict { .. })
        ));
        store.commit().unwrap();
        assert_eq!(objects(&mut store, node, "tag"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_insert_before_makes_space() {
        let mut store = store();
        store.start_writing().unwrap();
        let node = store.new_node_id().unwrap();
        let _a = store.insert(node, "tag", text("a"), None, None).unwrap();
        let b = store.insert(node, "tag", text("b"), None, None).unwrap();
        let c = store.insert(node, "tag", text("c"), None, None).unwrap();
        store.insert(node, "tag", text("x"), Some(c), None).unwrap();
        store.insert(node, "tag", text("y"), Some(b), None).unwrap();
        assert_eq!(objects(&mut store, node, "tag"), vec!["a", "y", "b", "x", "c"]);
        store.commit().unwrap();
        assert_eq!(objects(&mut store, node, "tag"), vec!["a", "y", "b", "x", "c"]);
    }

    #[test]
    fn test_move_and_remove_keep_order() {
        let mut store = store();
        store.start_writing().unwrap();
        let node = store.new_node_id().unwrap();
        let a = store.insert(node, "tag", text("a"), None, None).unwrap();
        let b = store.insert(node, "tag", text("b"), None, None).unwrap();
        let c = store.insert(node, "tag", text("c"), None, None).unwrap();

        store.move_before_object(Some(a), c, None).unwrap();
        assert_eq!(objects(&mut store, node, "tag"), vec!["c", "a", "b"]);

        store.move_before_object(None, c, None).unwrap();
        assert_eq!(objects(&mut store, node, "tag"), vec!["a", "b", "c"]);

        assert_eq!(store.next_object_triple_id(a, None).unwrap(), Some(b));
        assert!(store.remove(b, None).unwrap());
        assert!(!store.remove(b, None).unwrap());
        assert_eq!(objects(&mut store, node, "tag"), vec!["a", "c"]);
        store.commit().unwrap();
        assert_eq!(objects(&mut store, node, "tag"), vec!["a", "c"]);
    }

    #[test]
    fn test_node_triples_and_backward_lists() {
        let mut store = store();
        store.start_writing().unwrap();
        let group = store.new_node_id().unwrap();
        let alice = store.new_node_id().unwrap();
        let bob = store.new_node_id().unwrap();
        store.insert(alice, "group", Datum::Node(group), None, None).unwrap();
        let t = store.insert(bob, "group", Datum::Node(group), None, None).unwrap();
        store.insert(alice, "name", text("Alice"), None, None).unwrap();

        let members: Vec<NodeId> = store
            .get_triples(None, Some("group"), Some(&Datum::Node(group)))
            .unwrap()
            .iter()
            .map(|t| t.sub)
            .collect();
        assert_eq!(members, vec![alice, bob]);

        store.move_before_subject(None, t, None).unwrap();
        let preds = store.node_predicates(group, None).unwrap();
        assert_eq!(preds.get("@group"), Some(&2));
        assert_eq!(store.node_pred_cardinality(alice, "name", Direction::Forward).unwrap(), 1);

        let all = store.get_triples(Some(alice), None, None).unwrap();
        assert_eq!(all.len(), 2);
        store.commit().unwrap();
    }

    #[test]
    fn test_update_changes_object_and_predicate() {
        let mut store = store();
        store.start_writing().unwrap();
        let node = store.new_node_id().unwrap();
        let t = store.insert(node, "title", text("old"), None, None).unwrap();
        store.update(t, None, None, Some(text("new"))).unwrap();
        assert_eq!(objects(&mut store, node, "title"), vec!["new"]);
        store.update(t, None, Some("subtitle"), None).unwrap();
        assert!(objects(&mut store, node, "title").is_empty());
        assert_eq!(objects(&mut store, node, "subtitle"), vec!["new"]);
        store.commit().unwrap();
        assert_eq!(store.get_triple(t, None).unwrap().unwrap().pred, "subtitle");
    }

    #[test]
    fn test_type_migration() {
        let mut store = store();
        store.start_writing().unwrap();
        let node = store.new_node_id().unwrap();
        store.insert(node, "age", text("42"), None, None).unwrap();
        store.set_pred_type("age", DatumType::Int).unwrap();
        let triples = store.get_triples(Some(node), Some("age"), None).unwrap();
        assert_eq!(triples[0].ob, Datum::Int(42));
        store.commit().unwrap();

        store.start_writing().unwrap();
        store.insert(node, "when", text("soon"), None, None).unwrap();
        assert!(matches!(
            store.set_pred_type("when", DatumType::DateTime),
            Err(Error::CastError { .. })
        ));
        store.rollback().unwrap();
        assert_eq!(store.pred_type("age").unwrap(), Some(DatumType::Int));
        assert_eq!(store.pred_type("when").unwrap(), None);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let mut store = store();
        store.start_writing().unwrap();
        let node = store.new_node_id().unwrap();
        store.insert(node, "name", text("x"), None, None).unwrap();
        store.rollback().unwrap();
        assert!(!store.node_exists(node).unwrap());
        assert!(objects(&mut store, node, "name").is_empty());
    }

    #[test]
    fn test_tiny_cache_and_long_lists() {
        let mut store = store_with(StoreOptions {
            node_cache_size: 2,
            ..Default::default()
        });
        store.start_writing().unwrap();
        let nodes: Vec<NodeId> = (0..5).map(|_| store.new_node_id().unwrap()).collect();
        for (i, node) in nodes.iter().enumerate() {
            for j in 0..12 {
                store
                    .insert(*node, "n", Datum::Int((i * 100 + j) as i64), None, None)
                    .unwrap();
            }
        }
        store.commit().unwrap();
        for (i, node) in nodes.iter().enumerate() {
            let values: Vec<i64> = store
                .get_triples(Some(*node), Some("n"), None)
                .unwrap()
                .iter()
                .filter_map(|t| match t.ob {
                    Datum::Int(v) => Some(v),
                    _ => None,
                })
                .collect();
            let expected: Vec<i64> = (0..12).map(|j| (i * 100 + j) as i64).collect();
            assert_eq!(values, expected);
            assert_eq!(store.node_pred_cardinality(*node, "n", Direction::Forward).unwrap(), 12);
        }
        assert!(store.cached_nodes() <= 2);
    }

    #[test]
    fn test_reopen_reads_persisted_props() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let node;
        {
            let backend = SqliteBackend::open(&path, "g").unwrap();
            let mut store = TripleStore::new(Box::new(backend), StoreOptions::default());
            store.start_writing().unwrap();
            node = store.new_node_id().unwrap();
            store.insert(node, "name", text("persisted"), None, None).unwrap();
            store.commit().unwrap();
        }
        let backend = SqliteBackend::open(&path, "g").unwrap();
        let mut store = TripleStore::new(Box::new(backend), StoreOptions::default());
        assert_eq!(objects(&mut store, node, "name"), vec!["persisted"]);
        assert!(store.node_exists(node).unwrap());
    }
}
