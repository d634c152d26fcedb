//! 查询结果
//!
//! 结果行在执行时一次取回，之后可以顺序遍历、回到开头或按序号定位。
//! 每行带有节点的 props 快照，取节点时用来预热节点缓存。

use crate::storage::NodeRow;
use crate::types::NodeId;

#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    rows: Vec<NodeRow>,
    scope: Option<String>,
    pos: usize,
}

impl ResultSet {
    pub fn new(rows: Vec<NodeRow>, scope: Option<String>) -> Self {
        Self { rows, scope, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 查询的作用类型，取节点时按它解析
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// 定位到第 `pos` 行，越界时返回 false
    pub fn seek(&mut self, pos: usize) -> bool {
        self.pos = pos.min(self.rows.len());
        pos < self.rows.len()
    }

    /// 当前行
    pub fn current(&self) -> Option<&NodeRow> {
        self.rows.get(self.pos)
    }

    pub fn get(&self, index: usize) -> Option<&NodeRow> {
        self.rows.get(index)
    }

    pub fn rows(&self) -> &[NodeRow] {
        &self.rows
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.rows.iter().map(|r| r.id).collect()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.rows.iter().any(|r| r.id == id)
    }
}

impl Iterator for ResultSet {
    type Item = NodeRow;

    fn next(&mut self) -> Option<NodeRow> {
        let row = self.rows.get(self.pos).cloned();
        if row.is_some() {
            self.pos += 1;
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(ids: &[NodeId]) -> Vec<NodeRow> {
        ids.iter()
            .map(|&id| NodeRow { id, props: None })
            .collect()
    }

    #[test]
    fn test_cursor() {
        let mut rs = ResultSet::new(rows(&[3, 5, 8]), Some("Book".into()));
        assert_eq!(rs.len(), 3);
        assert_eq!(rs.scope(), Some("Book"));
        assert_eq!(rs.next().map(|r| r.id), Some(3));
        assert_eq!(rs.next().map(|r| r.id), Some(5));
        assert_eq!(rs.current().map(|r| r.id), Some(8));

        assert!(rs.seek(0));
        assert_eq!(rs.current().map(|r| r.id), Some(3));
        assert!(!rs.seek(10));
        assert!(rs.current().is_none());
        assert!(rs.next().is_none());

        rs.rewind();
        let collected: Vec<NodeId> = rs.by_ref().map(|r| r.id).collect();
        assert_eq!(collected, vec![3, 5, 8]);
        assert_eq!(rs.ids(), vec![3, 5, 8]);
        assert!(rs.contains(5));
    }
}
