//! Snapshot of this node's direct descendants.

use crate::address::NodeAddress;
use crate::config::ROUTING_TABLE_CAPACITY;
use crate::mesh::MeshStack;

/// Returns the logical addresses of this node's children in routing-table order.
///
/// The stack always lists the local node first; that entry is skipped. A failed
/// query is logged and treated as "no children".
pub fn children(stack: &dyn MeshStack) -> Vec<NodeAddress> {
    match stack.routing_table(ROUTING_TABLE_CAPACITY) {
        Ok(table) => table.into_iter().skip(1).map(|entry| entry.logical()).collect(),
        Err(err) => {
            log::warn!("[{}] routing table query failed: {}", stack.radio_address().logical(), err);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::RadioAddress;
    use crate::testing::RecordingStack;

    #[test]
    fn skips_self_entry_and_offsets_the_rest() {
        let stack = RecordingStack::new([0xaa, 0, 0, 0, 0, 0x10]);
        stack.set_routing_table(vec![
            RadioAddress([0xaa, 0, 0, 0, 0, 0x10]),
            RadioAddress([0xaa, 0, 0, 0, 0, 0x20]),
            RadioAddress([0xaa, 0, 0, 0, 0, 0x30]),
        ]);
        let names: Vec<String> = children(&stack).iter().map(|a| a.to_string()).collect();
        assert_eq!(names, vec!["AA:00:00:00:00:21", "AA:00:00:00:00:31"]);
    }

    #[test]
    fn empty_and_self_only_tables_give_no_children() {
        let stack = RecordingStack::new([0xaa, 0, 0, 0, 0, 0x10]);
        stack.set_routing_table(vec![]);
        assert!(children(&stack).is_empty());
        stack.set_routing_table(vec![RadioAddress([0xaa, 0, 0, 0, 0, 0x10])]);
        assert!(children(&stack).is_empty());
    }

    #[test]
    fn query_failure_gives_no_children() {
        let stack = RecordingStack::new([0xaa, 0, 0, 0, 0, 0x10]);
        stack.set_routing_table(vec![RadioAddress([0xaa, 0, 0, 0, 0, 0x10]), RadioAddress([0xaa, 0, 0, 0, 0, 0x20])]);
        stack.fail_routing_table(true);
        assert!(children(&stack).is_empty());
    }
}
