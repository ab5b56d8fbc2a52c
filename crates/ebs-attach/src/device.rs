//! Device slot allocation
//!
//! Slots are `/dev/xvd` followed by two letters: the first from a reserved
//! prefix set, the second `a` through `z`. Allocation walks the space in a
//! fixed order and returns the first path the node is not using and has not
//! detached from earlier in the pass, so retrying against the same snapshot
//! always picks the same slot.

use ebs_common::Error;

use crate::node::NodeSnapshot;

/// Common prefix of every device path
pub const DEVICE_PREFIX: &str = "/dev/xvd";

/// Leading letters reserved for EBS attachments, in allocation order
const SLOT_PREFIXES: [char; 2] = ['b', 'c'];

/// Number of slots one node can expose
pub const DEVICE_SLOTS: usize = SLOT_PREFIXES.len() * 26;

/// Every device path in allocation order
pub fn device_slots() -> impl Iterator<Item = String> {
    SLOT_PREFIXES.into_iter().flat_map(|first| {
        ('a'..='z').map(move |second| format!("{DEVICE_PREFIX}{first}{second}"))
    })
}

/// Pick the first device path that is neither attached nor held on the node
pub fn allocate(node: &NodeSnapshot) -> Result<String, Error> {
    device_slots()
        .find(|device| node.device_free(device))
        .ok_or_else(|| Error::NoFreeDeviceSlots {
            node: node.name.clone(),
            slots: DEVICE_SLOTS,
        })
}
