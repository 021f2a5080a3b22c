use std::{fmt, str::FromStr};

use super::error::MutexError;

/// Stable identifier of a tree vertex.
///
/// Every "is this me" or "is this the same requester" decision compares ids,
/// never channel handles.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

// Accepts both "n7" and "7".
impl FromStr for NodeId {
    type Err = MutexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('n').unwrap_or(s);
        digits
            .parse::<u32>()
            .map(NodeId)
            .map_err(|_| MutexError::InvalidCommand(format!("not a node id: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_id() {
        assert_eq!("n7".parse::<NodeId>().unwrap(), NodeId(7));
        assert_eq!("10".parse::<NodeId>().unwrap(), NodeId(10));
        assert!("node".parse::<NodeId>().is_err());
        assert_eq!(NodeId(4).to_string(), "n4");
    }
}
