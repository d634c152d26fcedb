//! 属性值列表
//!
//! [`PropMut`] 是节点在一个有向谓词下的有序值列表。写入按固定顺序校验：
//!
//! 1. 校验器（可以否决或改写值）
//! 2. 访问掩码
//! 3. 唯一性与重复值
//! 4. 节点值：目标类型、反向定义的校验器、基数与触发器
//! 5. 写入存储
//! 6. 触发器
//!
//! 学习模式下，2~4 步的违规通过 [`Schema::relax`](crate::schema::Schema::relax) 放宽定义后继续。

use crate::error::{Error, Result};
use crate::graph::database::Database;
use crate::graph::node::Node;
use crate::query::{Query, ResultSet};
use crate::schema::def::AccessMask;
use crate::schema::name::inverse_name;
use crate::schema::{DefRef, Relaxation};
use crate::types::{Datum, DatumType, Direction, NodeId, Triple, TripleId, Value};

pub struct PropMut<'a> {
    db: &'a mut Database,
    node: Node,
    type_name: String,
    /// 存储谓词，可能带语言后缀
    pred: String,
    dir: Direction,
    def: Option<DefRef>,
    datatype: Option<DatumType>,
    mask: AccessMask,
    privileged: bool,
    /// 最近一次写入的节点值所带的类型
    was_type: Option<String>,
}

fn target_id(datum: &Datum) -> Result<NodeId> {
    match datum {
        Datum::Node(id) if *id > 0 => Ok(*id),
        other => Err(Error::InvalidReference(other.to_string())),
    }
}

impl<'a> PropMut<'a> {
    /// 打开属性并对齐定义与谓词登记的数据类型
    ///
    /// 定义声明的类型与已登记类型不同时，学习模式下迁移谓词，冻结时报 `TypeConflict`。
    pub(crate) fn open(
        db: &'a mut Database,
        node: Node,
        type_name: String,
        pred: String,
        dir: Direction,
        def: Option<DefRef>,
        privileged: bool,
    ) -> Result<Self> {
        let mut datatype = match dir {
            Direction::Backward => Some(DatumType::Node),
            Direction::Forward => db.store.pred_type(&pred)?,
        };
        let mut mask = AccessMask::FULL;
        if let Some(r) = &def {
            let (declared, def_mask) = {
                let d = db.schema.def(r)?;
                (d.datatype, d.mask)
            };
            if !privileged {
                mask = def_mask;
            }
            match (declared, datatype) {
                (Some(want), None) => datatype = Some(want),
                (None, Some(stored)) => {
                    db.schema.learn(r, Relaxation::Datatype(stored))?;
                }
                (Some(want), Some(stored)) if want != stored && dir == Direction::Forward => {
                    if db.schema.def_frozen(r) {
                        return Err(Error::TypeConflict {
                            predicate: pred,
                            declared: want.to_string(),
                            actual: stored.to_string(),
                        });
                    }
                    db.alter_property_type(&pred, want)?;
                    datatype = Some(want);
                }
                _ => {}
            }
        }
        Ok(Self {
            db,
            node,
            type_name,
            pred,
            dir,
            def,
            datatype,
            mask,
            privileged,
            was_type: None,
        })
    }

    pub(crate) fn override_mask(&mut self, mask: AccessMask) {
        self.mask = mask;
    }

    pub fn pred(&self) -> &str {
        &self.pred
    }

    pub fn dir(&self) -> Direction {
        self.dir
    }

    pub fn datatype(&self) -> Option<DatumType> {
        self.datatype
    }

    fn label(&self) -> String {
        let name = match &self.def {
            Some(r) => self
                .db
                .schema
                .def(r)
                .map(|d| d.proper_name.clone())
                .unwrap_or_else(|_| self.pred.clone()),
            None => format!("{}{}", self.dir.prefix(), self.pred),
        };
        format!("{}.{}", self.type_name, name)
    }

    fn hook_names(&self) -> Vec<String> {
        match &self.def {
            Some(r) => match self.db.schema.def(r) {
                Ok(d) => vec![d.proper_name.clone(), d.rel_name.clone()],
                Err(_) => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    fn def_flags(&self) -> Result<(bool, bool, bool)> {
        match &self.def {
            Some(r) => {
                let d = self.db.schema.def(r)?;
                Ok((d.unique, d.repetitions, d.required))
            }
            None => Ok((false, true, false)),
        }
    }

    // ==================== 读取 ====================

    fn triples(&mut self) -> Result<Vec<Triple>> {
        match self.dir {
            Direction::Forward => self
                .db
                .store
                .get_triples(Some(self.node.id()), Some(&self.pred), None),
            Direction::Backward => {
                let me = Datum::Node(self.node.id());
                self.db.store.get_triples(None, Some(&self.pred), Some(&me))
            }
        }
    }

    fn triple_at(&mut self, index: usize) -> Result<Option<Triple>> {
        Ok(self.triples()?.into_iter().nth(index))
    }

    /// 本列表中值为 `datum` 的第一个三元组
    fn find_triple(&mut self, datum: &Datum) -> Result<Option<Triple>> {
        let found = match self.dir {
            Direction::Forward => {
                self.db
                    .store
                    .get_triples(Some(self.node.id()), Some(&self.pred), Some(datum))?
            }
            Direction::Backward => {
                let me = Datum::Node(self.node.id());
                self.db
                    .store
                    .get_triples(Some(target_id(datum)?), Some(&self.pred), Some(&me))?
            }
        };
        Ok(found.into_iter().next())
    }

    fn to_value(&mut self, datum: Datum) -> Result<Value> {
        match datum {
            Datum::Node(id) => Ok(Value::Node(self.db.get_node(id)?)),
            other => Ok(Value::from(other)),
        }
    }

    fn check_read(&mut self) -> Result<()> {
        self.require(AccessMask::READ, AccessMask::READ, "读取")
    }

    pub fn values(&mut self) -> Result<Vec<Value>> {
        self.check_read()?;
        let dir = self.dir;
        let mut values = Vec::new();
        for triple in self.triples()? {
            values.push(self.to_value(triple.far_end(dir))?);
        }
        Ok(values)
    }

    pub fn get_at(&mut self, index: usize) -> Result<Option<Value>> {
        self.check_read()?;
        match self.triple_at(index)? {
            Some(triple) => self.to_value(triple.far_end(self.dir)).map(Some),
            None => Ok(None),
        }
    }

    pub fn count(&mut self) -> Result<usize> {
        self.db
            .store
            .node_pred_cardinality(self.node.id(), &self.pred, self.dir)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    /// 按属性类型转换后查找，不学习类型
    fn lookup(&mut self, value: &Value) -> Result<Option<Triple>> {
        if value.is_empty() {
            return Ok(None);
        }
        let mut datum = value.to_datum()?;
        if let Some(ty) = self.datatype {
            if datum.datatype() != ty {
                match datum.cast(ty) {
                    Ok(cast) => datum = cast,
                    Err(_) => return Ok(None),
                }
            }
        }
        if self.dir == Direction::Backward && datum.as_node().map_or(true, |id| id == 0) {
            return Ok(None);
        }
        self.find_triple(&datum)
    }

    pub fn contains(&mut self, value: impl Into<Value>) -> Result<bool> {
        Ok(self.lookup(&value.into())?.is_some())
    }

    /// 值的文本以 `sep` 连接；节点值显示为 `Node N`
    pub fn join(&mut self, sep: &str) -> Result<String> {
        let parts: Vec<String> = self.values()?.iter().map(|v| v.to_string()).collect();
        Ok(parts.join(sep))
    }

    // ==================== 写入 ====================

    /// 外部值转为存储值，记录节点值的类型，必要时学习属性类型
    fn unpack(&mut self, value: &Value) -> Result<Datum> {
        self.was_type = match value {
            Value::Node(node) => node.type_name().map(str::to_string),
            _ => None,
        };
        let datum = value.to_datum()?;
        match self.datatype {
            Some(ty) if datum.datatype() != ty => datum.cast(ty),
            Some(_) => Ok(datum),
            None => {
                let ty = datum.datatype();
                self.datatype = Some(ty);
                if let Some(r) = self.def.clone() {
                    self.db.schema.learn(&r, Relaxation::Datatype(ty))?;
                }
                Ok(datum)
            }
        }
    }

    /// 缺少 `op` 权限时放宽（授予 `grant`）或报错
    fn require(&mut self, op: AccessMask, grant: AccessMask, verb: &str) -> Result<()> {
        if self.mask.allows(op) {
            return Ok(());
        }
        let violation = Error::AccessDenied {
            operation: verb.to_string(),
            property: self.label(),
        };
        let Some(r) = self.def.clone() else {
            return Err(violation);
        };
        self.db.schema.relax(&r, Relaxation::Grant(grant), violation)?;
        self.mask = self.mask | grant;
        Ok(())
    }

    fn required_violation(&mut self) -> Result<()> {
        let Some(r) = self.def.clone() else {
            return Ok(());
        };
        let violation = Error::RequiredViolation {
            property: self.label(),
            node: self.node.id(),
        };
        self.db.schema.relax(&r, Relaxation::DropRequired, violation)
    }

    /// 运行校验器；返回 false 表示值被改写为空，放弃这次写入
    ///
    /// 节点值只能被否决，不能被改写。
    fn run_validator(&mut self, datum: &mut Datum) -> Result<bool> {
        if self.privileged {
            return Ok(true);
        }
        let names = self.hook_names();
        let Some(validator) = self.db.validator(&self.type_name, &names) else {
            return Ok(true);
        };
        let node = self.node.clone();
        let mut candidate = datum.clone();
        validator(&mut *self.db, &node, &mut candidate)?;
        if self.datatype == Some(DatumType::Node) {
            return Ok(true);
        }
        if matches!(&candidate, Datum::String(s) if s.is_empty()) {
            return Ok(false);
        }
        *datum = match self.datatype {
            Some(ty) => candidate.cast(ty)?,
            None => candidate,
        };
        Ok(true)
    }

    /// 全库范围内同一 (谓词, 值) 的三元组
    fn find_unique_clash(&mut self, datum: &Datum) -> Result<Option<Triple>> {
        let found = match self.dir {
            Direction::Forward => self.db.store.get_triples(None, Some(&self.pred), Some(datum))?,
            Direction::Backward => self
                .db
                .store
                .get_triples(Some(target_id(datum)?), Some(&self.pred), None)?,
        };
        Ok(found.into_iter().next())
    }

    fn relax_unique(&mut self, datum: &Datum) -> Result<()> {
        let Some(r) = self.def.clone() else {
            return Ok(());
        };
        let violation = Error::UniquenessViolation {
            property: self.label(),
            value: datum.to_string(),
        };
        self.db.schema.relax(&r, Relaxation::DropUnique, violation)
    }

    fn relax_repetition(&mut self, datum: &Datum) -> Result<()> {
        let Some(r) = self.def.clone() else {
            return Ok(());
        };
        let violation = Error::CardinalityViolation(format!(
            "{} 已包含值 {}",
            self.label(),
            datum
        ));
        self.db.schema.relax(&r, Relaxation::AllowRepetitions, violation)
    }

    pub(crate) fn validate_insert(&mut self, datum: &Datum) -> Result<()> {
        self.require(AccessMask::INSERT, AccessMask::FULL, "插入")?;
        let (unique, repetitions, _) = self.def_flags()?;
        if unique {
            if self.find_unique_clash(datum)?.is_some() {
                self.relax_unique(datum)?;
            }
        } else if !repetitions && self.find_triple(datum)?.is_some() {
            self.relax_repetition(datum)?;
        }
        Ok(())
    }

    /// 返回 true 表示新值就是当前三元组，无需写入
    ///
    /// 重置列表时，只有排在当前位置之前的相同值才算冲突。
    fn validate_update(&mut self, current: &Triple, datum: &Datum, resetting: bool) -> Result<bool> {
        let (unique, repetitions, _) = self.def_flags()?;
        let clash = if unique {
            self.find_unique_clash(datum)?
        } else if !repetitions {
            self.find_triple(datum)?
        } else {
            None
        };
        if let Some(found) = clash {
            if found.id == current.id {
                return Ok(true);
            }
            if !resetting || found.order_key(self.dir) < current.order_key(self.dir) {
                if unique {
                    self.relax_unique(datum)?;
                } else {
                    self.relax_repetition(datum)?;
                }
            }
        }
        self.require(AccessMask::UPDATE, AccessMask::FULL, "修改")?;
        Ok(false)
    }

    /// 删除节点值前检查另一端的反向定义
    fn validate_node_delete(&mut self, triple: &Triple, update: bool) -> Result<()> {
        let target = target_id(&triple.far_end(self.dir))?;
        let iname = inverse_name(&self.pred, self.dir);
        let me = self.node.id();
        let label = self.label();
        let source = self.source_type()?;
        let privileged = self.privileged;
        for top in self.db.top_types(target)? {
            let Some(ir) = self.db.schema.find_def(&top, &iname, false)? else {
                continue;
            };
            let (imask, isource, irequired, ipred, idir) = {
                let d = self.db.schema.def(&ir)?;
                (d.mask, d.source_type.clone(), d.required, d.pred.clone(), d.dir)
            };
            let mask = if privileged && source.as_deref() == Some(isource.as_str()) {
                AccessMask::FULL
            } else {
                imask
            };
            if !mask.allows(AccessMask::DELETE) && !self.db.is_deleting(target) {
                let violation = Error::AccessDenied {
                    operation: "删除".to_string(),
                    property: label.clone(),
                };
                self.db.schema.relax(&ir, Relaxation::Grant(AccessMask::FULL), violation)?;
            }
            let inode = Node::typed(target, &top);
            let mut iprop =
                PropMut::open(&mut *self.db, inode, top.clone(), ipred, idir, Some(ir), false)?;
            iprop.override_mask(mask);
            if irequired && !iprop.db.is_deleting(target) && iprop.count()? == 1 {
                iprop.required_violation()?;
            }
            if !update {
                iprop.fire_deleted(&Datum::Node(me))?;
            }
            break;
        }
        Ok(())
    }

    /// 写入节点值前检查目标类型与另一端的反向定义
    ///
    /// `replaced` 为被替换的旧目标，此时另一端触发更新而不是插入。
    fn validate_node_insert(&mut self, datum: &Datum, replaced: Option<&Datum>) -> Result<()> {
        let target = target_id(datum)?;
        if !self.db.store.node_exists(target)? {
            return Err(Error::InvalidReference(format!("节点 #{} 不存在", target)));
        }
        let me = self.node.id();
        let label = self.label();
        let was_type = self.was_type.clone();
        if let Some(r) = self.def.clone() {
            let node_type = self.db.schema.def(&r)?.node_type.clone();
            match node_type {
                Some(expected) => {
                    if was_type.as_deref() != Some(expected.as_str())
                        && !self.db.contains_node(&expected, target)?
                    {
                        return Err(Error::InvalidReference(format!(
                            "节点 #{} 不是属性 {} 要求的 {} 类型",
                            target, label, expected
                        )));
                    }
                }
                None => {
                    if let Some(wt) = &was_type {
                        self.db.schema.learn(&r, Relaxation::NodeType(wt.clone()))?;
                    }
                }
            }
        }

        let iname = inverse_name(&self.pred, self.dir);
        let mut found = None;
        if let Some(wt) = &was_type {
            if let Some(ir) = self.db.schema.find_def(wt, &iname, true)? {
                found = Some((wt.clone(), ir));
            }
        }
        if found.is_none() {
            for top in self.db.top_types(target)? {
                if let Some(ir) = self.db.schema.find_def(&top, &iname, false)? {
                    found = Some((top, ir));
                    break;
                }
            }
        }
        let Some((itype, ir)) = found else {
            return Ok(());
        };

        let (inode_type, imask, isource, is_list, ipred, idir, iproper) = {
            let d = self.db.schema.def(&ir)?;
            (
                d.node_type.clone(),
                d.mask,
                d.source_type.clone(),
                d.is_list,
                d.pred.clone(),
                d.dir,
                d.proper_name.clone(),
            )
        };
        match inode_type {
            Some(expected) => {
                if !self.db.contains_node(&expected, me)? {
                    return Err(Error::InvalidReference(format!(
                        "节点 #{} 不是属性 {}.{} 要求的 {} 类型",
                        me, itype, iproper, expected
                    )));
                }
            }
            None => {
                if self.type_name != crate::graph::UNTYPED {
                    let mine = self.type_name.clone();
                    self.db.schema.learn(&ir, Relaxation::NodeType(mine))?;
                }
            }
        }
        let source = self.source_type()?;
        let mask = if self.privileged && source.as_deref() == Some(isource.as_str()) {
            AccessMask::FULL
        } else {
            imask
        };

        let inode = Node::typed(target, &itype);
        let mut iprop = PropMut::open(&mut *self.db, inode.clone(), itype, ipred, idir, Some(ir), false)?;
        iprop.override_mask(mask);
        let inames = iprop.hook_names();
        if let Some(validator) = iprop.db.validator(&iprop.type_name, &inames) {
            let mut backref = Datum::Node(me);
            validator(&mut *iprop.db, &inode, &mut backref)?;
        }
        let back = Datum::Node(me);
        iprop.validate_insert(&back)?;
        if !is_list && iprop.count()? > 0 {
            return Err(Error::CardinalityViolation(format!(
                "属性 {} 是单值的",
                iprop.label()
            )));
        }
        match replaced {
            None => iprop.fire_inserted(&back),
            Some(old) => iprop.fire_updated(&back, old),
        }
    }

    fn source_type(&self) -> Result<Option<String>> {
        match &self.def {
            Some(r) => Ok(Some(self.db.schema.def(r)?.source_type.clone())),
            None => Ok(None),
        }
    }

    // ==================== 触发器 ====================

    fn fire_inserted(&mut self, datum: &Datum) -> Result<()> {
        if self.privileged {
            return Ok(());
        }
        let names = self.hook_names();
        if let Some(trigger) = self.db.inserted_trigger(&self.type_name, &names) {
            let node = self.node.clone();
            trigger(&mut *self.db, &node, datum)?;
        }
        Ok(())
    }

    fn fire_updated(&mut self, datum: &Datum, old: &Datum) -> Result<()> {
        if self.privileged {
            return Ok(());
        }
        let names = self.hook_names();
        if let Some(trigger) = self.db.updated_trigger(&self.type_name, &names) {
            let node = self.node.clone();
            trigger(&mut *self.db, &node, datum, old)?;
        }
        Ok(())
    }

    fn fire_deleted(&mut self, datum: &Datum) -> Result<()> {
        if self.privileged {
            return Ok(());
        }
        let names = self.hook_names();
        if let Some(trigger) = self.db.deleted_trigger(&self.type_name, &names) {
            let node = self.node.clone();
            trigger(&mut *self.db, &node, datum)?;
        }
        Ok(())
    }

    // ==================== 单个三元组的写入 ====================

    fn empty_value(&self) -> Error {
        Error::Validation(format!("不能向 {} 写入空值", self.label()))
    }

    fn insert_value(&mut self, value: &Value, before: Option<TripleId>) -> Result<()> {
        if value.is_empty() {
            return Err(self.empty_value());
        }
        let mut datum = self.unpack(value)?;
        if !self.run_validator(&mut datum)? {
            return Ok(());
        }
        self.validate_insert(&datum)?;
        if self.datatype == Some(DatumType::Node) {
            self.validate_node_insert(&datum, None)?;
        }
        let me = self.node.id();
        match self.dir {
            Direction::Forward => {
                self.db.store.insert(me, &self.pred, datum.clone(), before, None)?;
            }
            Direction::Backward => {
                let sub = target_id(&datum)?;
                self.db
                    .store
                    .insert(sub, &self.pred, Datum::Node(me), None, before)?;
            }
        }
        self.fire_inserted(&datum)
    }

    fn update_triple(&mut self, triple: &Triple, value: &Value, resetting: bool) -> Result<()> {
        if value.is_empty() {
            return Err(self.empty_value());
        }
        let mut datum = self.unpack(value)?;
        if !self.run_validator(&mut datum)? {
            return self.delete_triple(triple, false);
        }
        if self.validate_update(triple, &datum, resetting)? {
            return Ok(());
        }
        let old = triple.far_end(self.dir);
        if self.datatype == Some(DatumType::Node) {
            self.validate_node_delete(triple, true)?;
            self.validate_node_insert(&datum, Some(&old))?;
        }
        match self.dir {
            Direction::Forward => {
                self.db
                    .store
                    .update(triple.id, None, None, Some(datum.clone()))?;
            }
            Direction::Backward => {
                let sub = target_id(&datum)?;
                self.db.store.update(triple.id, Some(sub), None, None)?;
            }
        }
        self.fire_updated(&datum, &old)
    }

    fn delete_triple(&mut self, triple: &Triple, required_checked: bool) -> Result<()> {
        if !self.db.is_deleting(self.node.id()) {
            self.require(AccessMask::DELETE, AccessMask::FULL, "删除")?;
        }
        if !required_checked {
            let (_, _, required) = self.def_flags()?;
            if required && self.count()? == 1 {
                self.required_violation()?;
            }
        }
        if self.datatype == Some(DatumType::Node) {
            self.validate_node_delete(triple, false)?;
        }
        self.db.store.remove(triple.id, Some(&self.pred))?;
        self.fire_deleted(&triple.far_end(self.dir))
    }

    // ==================== 列表操作 ====================

    /// 写入第 `index` 个值；`index` 等于个数时追加，空值删除该位置
    pub fn set_at(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let triples = self.triples()?;
        if index == triples.len() {
            if value.is_empty() {
                return Ok(());
            }
            return self.insert_value(&value, None);
        }
        let Some(triple) = triples.get(index) else {
            return Err(Error::Validation(format!(
                "{} 只有 {} 个值，不能写入第 {} 个",
                self.label(),
                triples.len(),
                index
            )));
        };
        if value.is_empty() {
            self.delete_triple(triple, false)
        } else {
            self.update_triple(triple, &value, false)
        }
    }

    /// 追加一个值；列表逐项追加
    pub fn append(&mut self, value: impl Into<Value>) -> Result<()> {
        match value.into() {
            Value::List(values) => {
                for v in values {
                    self.insert_value(&v, None)?;
                }
                Ok(())
            }
            v => self.insert_value(&v, None),
        }
    }

    /// 用新列表替换全部值，尽量原位更新
    pub fn reset(&mut self, values: Vec<Value>) -> Result<()> {
        let triples = self.triples()?;
        for (i, value) in values.iter().enumerate() {
            match triples.get(i) {
                Some(triple) => self.update_triple(triple, value, true)?,
                None => self.insert_value(value, None)?,
            }
        }
        let (_, _, required) = self.def_flags()?;
        if values.is_empty()
            && required
            && !triples.is_empty()
            && !self.db.is_deleting(self.node.id())
        {
            self.required_violation()?;
        }
        for triple in triples.iter().skip(values.len()) {
            if self.db.store.get_triple(triple.id, Some(&self.pred))?.is_some() {
                self.delete_triple(triple, true)?;
            }
        }
        Ok(())
    }

    /// 不存在时追加，返回是否写入
    pub fn add(&mut self, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        if self.lookup(&value)?.is_some() {
            return Ok(false);
        }
        self.insert_value(&value, None)?;
        Ok(true)
    }

    /// 存在时删除，返回是否删除
    pub fn remove(&mut self, value: impl Into<Value>) -> Result<bool> {
        match self.lookup(&value.into())? {
            Some(triple) => {
                self.delete_triple(&triple, false)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 删除全部值
    pub fn delete(&mut self) -> Result<()> {
        let triples = self.triples()?;
        if triples.is_empty() {
            return Ok(());
        }
        let (_, _, required) = self.def_flags()?;
        if required && !self.db.is_deleting(self.node.id()) {
            self.required_violation()?;
        }
        for triple in &triples {
            self.delete_triple(triple, true)?;
        }
        Ok(())
    }

    pub fn unset_at(&mut self, index: usize) -> Result<()> {
        match self.triple_at(index)? {
            Some(triple) => self.delete_triple(&triple, false),
            None => Ok(()),
        }
    }

    /// 插在第 `index` 个值之前；越界时追加
    pub fn prepend(&mut self, value: impl Into<Value>, index: usize) -> Result<()> {
        let value = value.into();
        let before = self.triple_at(index)?.map(|t| t.id);
        self.insert_value(&value, before)
    }

    /// 插在第 `index` 个值之后；越界时追加
    pub fn insert_after(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let before = match self.triple_at(index)? {
            Some(triple) => self.next_triple_id(triple.id)?,
            None => None,
        };
        self.insert_value(&value, before)
    }

    fn next_triple_id(&mut self, id: TripleId) -> Result<Option<TripleId>> {
        match self.dir {
            Direction::Forward => self.db.store.next_object_triple_id(id, Some(&self.pred)),
            Direction::Backward => self.db.store.next_subject_triple_id(id, Some(&self.pred)),
        }
    }

    fn existing(&mut self, value: &Value) -> Result<Triple> {
        self.lookup(value)?.ok_or_else(|| {
            Error::Validation(format!("{} 中没有值 {}", self.label(), value))
        })
    }

    fn move_triple(&mut self, id: TripleId, before: Option<TripleId>) -> Result<()> {
        self.require(AccessMask::UPDATE, AccessMask::FULL, "修改")?;
        match self.dir {
            Direction::Forward => self.db.store.move_before_object(before, id, Some(&self.pred)),
            Direction::Backward => self.db.store.move_before_subject(before, id, Some(&self.pred)),
        }
    }

    /// 把 `value` 移到 `reference` 之前；没有参照时移到末尾
    pub fn move_before(&mut self, value: impl Into<Value>, reference: Option<Value>) -> Result<()> {
        let triple = self.existing(&value.into())?;
        let before = match reference {
            Some(r) => Some(self.existing(&r)?.id),
            None => None,
        };
        self.move_triple(triple.id, before)
    }

    /// 把 `value` 移到 `reference` 之后
    pub fn move_after(&mut self, value: impl Into<Value>, reference: impl Into<Value>) -> Result<()> {
        let triple = self.existing(&value.into())?;
        let reference = self.existing(&reference.into())?;
        let before = self.next_triple_id(reference.id)?;
        self.move_triple(triple.id, before)
    }

    /// 把 `value` 移到第 `index` 位；越界时移到末尾
    pub fn move_to(&mut self, value: impl Into<Value>, index: usize) -> Result<()> {
        let triple = self.existing(&value.into())?;
        let before = self.triple_at(index)?.map(|t| t.id);
        self.move_triple(triple.id, before)
    }

    // ==================== 查询 ====================

    /// 在本属性的节点值中查询
    pub fn select(&mut self, filter: &str, params: &[Value]) -> Result<ResultSet> {
        if self.datatype != Some(DatumType::Node) {
            return Err(Error::Validation(format!(
                "只能在节点属性上查询: {}",
                self.label()
            )));
        }
        let iname = inverse_name(&self.pred, self.dir);
        let mut query = Query::new(filter).constraint(
            &format!("{}#source={}", iname, self.node.id()),
            Vec::new(),
        );
        if let Some(r) = &self.def {
            if let Some(node_type) = self.db.schema.def(r)?.node_type.clone() {
                query = query.scoped(&node_type);
            }
        }
        self.db.run_query(query, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::schema::TypeHooks;
    use chrono::NaiveDate;

    fn learning() -> Database {
        let mut db = Database::open(DatabaseConfig::in_memory().unfrozen()).unwrap();
        db.begin().unwrap();
        db
    }

    fn joined(db: &mut Database, node: &Node, name: &str) -> String {
        db.node(node).unwrap().prop(name).unwrap().join(",").unwrap()
    }

    #[test]
    fn test_list_order_and_moves() {
        let mut db = learning();
        let list = db.create("Playlist", &[]).unwrap();
        {
            let mut node = db.node(&list).unwrap();
            let mut songs = node.prop("songs").unwrap();
            for s in ["a", "b", "c", "d"] {
                songs.append(s).unwrap();
            }
            assert_eq!(songs.join(",").unwrap(), "a,b,c,d");

            songs.move_before("d", Some(Value::from("a"))).unwrap();
            assert_eq!(songs.join(",").unwrap(), "d,a,b,c");
            songs.move_after("d", "b").unwrap();
            assert_eq!(songs.join(",").unwrap(), "a,b,d,c");
            songs.move_to("c", 0).unwrap();
            assert_eq!(songs.join(",").unwrap(), "c,a,b,d");
            songs.move_before("c", None).unwrap();
            assert_eq!(songs.join(",").unwrap(), "a,b,d,c");
        }
        assert_eq!(joined(&mut db, &list, "songs"), "a,b,d,c");
    }

    #[test]
    fn test_insert_positions_and_removal_keep_order() {
        let mut db = learning();
        let list = db.create("Playlist", &[]).unwrap();
        let mut node = db.node(&list).unwrap();
        let mut songs = node.prop("songs").unwrap();
        songs.append(Value::List(vec!["a".into(), "b".into(), "c".into()])).unwrap();
        songs.prepend("x", 0).unwrap();
        assert_eq!(songs.join(",").unwrap(), "x,a,b,c");
        songs.insert_after(1, "y").unwrap();
        assert_eq!(songs.join(",").unwrap(), "x,a,y,b,c");
        songs.prepend("z", 99).unwrap();
        assert_eq!(songs.join(",").unwrap(), "x,a,y,b,c,z");

        assert!(songs.remove("a").unwrap());
        assert!(!songs.remove("missing").unwrap());
        songs.unset_at(0).unwrap();
        assert_eq!(songs.join(",").unwrap(), "y,b,c,z");

        songs.set_at(1, "B").unwrap();
        assert_eq!(songs.get_at(1).unwrap(), Some(Value::from("B")));
        songs.set_at(4, "tail").unwrap();
        assert!(matches!(songs.set_at(9, "far"), Err(Error::Validation(_))));
        assert_eq!(songs.count().unwrap(), 5);
        assert!(songs.contains("tail").unwrap());

        assert!(!songs.add("y").unwrap());
        assert!(songs.add("w").unwrap());
        songs.reset(vec!["only".into()]).unwrap();
        assert_eq!(songs.values().unwrap(), vec![Value::from("only")]);
        songs.delete().unwrap();
        assert!(songs.is_empty().unwrap());
    }

    #[test]
    fn test_values_keep_their_types() {
        let mut db = learning();
        let when = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        let other = db.create("Item", &[("label", "other".into())]).unwrap();
        let item = db
            .create(
                "Item",
                &[
                    ("count", 3.into()),
                    ("ratio", 0.5.into()),
                    ("label", "plain".into()),
                    ("seen", when.into()),
                    ("link", other.clone().into()),
                ],
            )
            .unwrap();

        let mut node = db.node(&item).unwrap();
        assert_eq!(node.get("count").unwrap(), Value::Int(3));
        assert_eq!(node.get("ratio").unwrap(), Value::Float(0.5));
        assert_eq!(node.get("label").unwrap(), Value::from("plain"));
        assert_eq!(node.get("seen").unwrap(), Value::DateTime(when));
        match node.get("link").unwrap() {
            Value::Node(n) => {
                assert_eq!(n, other);
                assert_eq!(n.type_name(), Some("Item"));
            }
            v => panic!("unexpected value {:?}", v),
        }

        // 已登记为整数的谓词写入字符串时按类型转换
        node.set("count", "12abc").unwrap();
        assert_eq!(node.get("count").unwrap(), Value::Int(12));
        assert!(matches!(node.set("seen", "soon"), Err(Error::CastError { .. })));
        assert_eq!(node.get("seen").unwrap(), Value::DateTime(when));
    }

    #[test]
    fn test_alter_property_type_migrates_values() {
        let mut db = learning();
        db.create("Item", &[("score", 5.into())]).unwrap();
        db.create("Item", &[("score", 2.into())]).unwrap();
        db.commit().unwrap();

        db.alter_property_type("score", DatumType::Float).unwrap();
        assert!(!db.is_writing());
        assert_eq!(db.store.pred_type("score").unwrap(), Some(DatumType::Float));
        assert_eq!(db.select("score > 4.5", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_backward_values_are_subjects() {
        let mut db = learning();
        let team = db.create("Team", &[("name", "core".into())]).unwrap();
        let ann = db.create("Member", &[("team", team.clone().into())]).unwrap();
        let bob = db.create("Member", &[("team", team.clone().into())]).unwrap();

        let mut node = db.node(&team).unwrap();
        let mut members = node.prop("@team").unwrap();
        assert_eq!(members.count().unwrap(), 2);
        assert_eq!(
            members.values().unwrap(),
            vec![Value::Node(ann.clone()), Value::Node(bob.clone())]
        );
        members.move_before(bob.clone(), Some(Value::Node(ann.clone()))).unwrap();
        assert_eq!(members.get_at(0).unwrap(), Some(Value::Node(bob)));

        let rs = members.select("team", &[]).unwrap();
        assert_eq!(rs.len(), 2);
    }

    #[test]
    fn test_frozen_select_through_reference() {
        let mut db = Database::open_in_memory().unwrap();
        db.define_type("Person", "string name\n").unwrap();
        db.define_type("Book", "string title\nPerson author\n").unwrap();
        db.begin().unwrap();
        db.create("Person", &[("name", "John".into())]).unwrap();
        let james = db.create("Person", &[("name", "James".into())]).unwrap();
        let book = db
            .create("Book", &[("title", "X".into()), ("author", james.clone().into())])
            .unwrap();

        let mut node = db.node(&book).unwrap();
        let mut author = node.prop("author").unwrap();
        let rs = author.select("name='James'", &[]).unwrap();
        assert_eq!(rs.ids(), vec![james.id()]);
        assert!(author.select("name='John'", &[]).unwrap().is_empty());

        assert!(matches!(
            db.type_select("Person", "nickname='x'", &[]),
            Err(Error::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_translations_fall_back() {
        let mut db = learning();
        let page = db.create("Page", &[]).unwrap();
        let mut node = db.node(&page).unwrap();
        node.set("title:en_US", "Color").unwrap();
        assert_eq!(node.get("title").unwrap(), Value::from("Color"));
        assert_eq!(node.get_tr("title", "en_GB").unwrap(), Value::from("Color"));

        node.set_tr("title", "en_GB", "Colour").unwrap();
        assert_eq!(node.get_tr("title", "en_GB").unwrap(), Value::from("Colour"));
        assert_eq!(node.get("title:en").unwrap(), Value::from("Color"));
        assert_eq!(node.get_tr("title", "fr").unwrap(), Value::from("Color"));
        assert!(matches!(
            node.set("title:english", "x"),
            Err(Error::InvalidLanguage(_))
        ));
    }

    #[test]
    fn test_validator_rejects_cycles() {
        let mut db = learning();
        db.register_hooks(
            "Group",
            TypeHooks::new().validator("parent", |db, node, value| {
                let mut cursor = value.as_node();
                while let Some(id) = cursor {
                    if id == node.id() {
                        return Err(Error::LoopError(format!("{} 不能成为自己的祖先", node)));
                    }
                    let ancestor = db.get_node(id)?;
                    cursor = match db.node(&ancestor)?.get("parent")? {
                        Value::Node(p) => Some(p.id()),
                        _ => None,
                    };
                }
                Ok(())
            }),
        );
        let a = db.create("Group", &[]).unwrap();
        let b = db.create("Group", &[("parent", a.clone().into())]).unwrap();
        let c = db.create("Group", &[("parent", b.clone().into())]).unwrap();

        let err = db.node(&a).unwrap().set("parent", c.clone()).unwrap_err();
        assert!(matches!(err, Error::LoopError(_)));
        assert_eq!(db.node(&a).unwrap().get("parent").unwrap(), Value::Null);
        assert_eq!(
            db.node(&c).unwrap().get("parent").unwrap(),
            Value::Node(Node::typed(b.id(), "Group"))
        );
    }

    #[test]
    fn test_triggers_fire_on_both_ends() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut db = learning();
        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
        db.register_hooks(
            "Task",
            TypeHooks::new()
                .on_inserted("owner", move |_, node, v| {
                    l1.borrow_mut().push(format!("insert {} {}", node.id(), v));
                    Ok(())
                })
                .on_deleted("owner", move |_, node, v| {
                    l2.borrow_mut().push(format!("delete {} {}", node.id(), v));
                    Ok(())
                }),
        );
        db.register_hooks(
            "User",
            TypeHooks::new().on_inserted("@owner", move |_, node, v| {
                l3.borrow_mut().push(format!("inverse {} {}", node.id(), v));
                Ok(())
            }),
        );
        let user = db.create("User", &[]).unwrap();
        let task = db.create("Task", &[("owner", user.clone().into())]).unwrap();
        db.node(&task).unwrap().set("owner", Value::Null).unwrap();

        let log = log.borrow();
        assert!(log.contains(&format!("insert {} Node {}", task.id(), user.id())));
        assert!(log.contains(&format!("inverse {} Node {}", user.id(), task.id())));
        assert!(log.contains(&format!("delete {} Node {}", task.id(), user.id())));
    }
}
