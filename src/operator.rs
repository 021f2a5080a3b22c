use std::str::FromStr;

use crate::{
    common::{MutexError, NodeId},
    network::Cluster,
};

/// One line of operator input.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperatorCommand {
    Enter(NodeId),
    Crash(NodeId),
    /// `None` prints every node.
    Print(Option<NodeId>),
    Quit,
}

impl FromStr for OperatorCommand {
    type Err = MutexError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["enter", node] => Ok(OperatorCommand::Enter(node.parse()?)),
            ["crash", node] => Ok(OperatorCommand::Crash(node.parse()?)),
            ["print", "all"] => Ok(OperatorCommand::Print(None)),
            ["print", node] => Ok(OperatorCommand::Print(Some(node.parse()?))),
            ["quit"] | ["exit"] => Ok(OperatorCommand::Quit),
            _ => Err(MutexError::InvalidCommand(line.trim().to_string())),
        }
    }
}

impl OperatorCommand {
    /// Hands the command to the addressed node. `Quit` is left to the caller.
    pub async fn apply(self, cluster: &Cluster) -> Result<(), MutexError> {
        match self {
            OperatorCommand::Enter(id) => cluster.node(id)?.enter_critical_section().await,
            OperatorCommand::Crash(id) => cluster.node(id)?.simulate_crash().await,
            OperatorCommand::Print(Some(id)) => cluster.node(id)?.print_state().await,
            OperatorCommand::Print(None) => {
                for node in cluster.nodes() {
                    node.print_state().await?;
                }
                Ok(())
            }
            OperatorCommand::Quit => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "enter n7".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Enter(NodeId(7))
        );
        assert_eq!(
            "  crash 3 ".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Crash(NodeId(3))
        );
        assert_eq!(
            "print all".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Print(None)
        );
        assert_eq!(
            "print n10".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Print(Some(NodeId(10)))
        );
        assert_eq!("quit".parse::<OperatorCommand>().unwrap(), OperatorCommand::Quit);
    }

    #[test]
    fn test_reject_unknown_input() {
        for line in ["", "enter", "enter x7", "fly n1", "crash n1 n2"] {
            assert!(matches!(
                line.parse::<OperatorCommand>(),
                Err(MutexError::InvalidCommand(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_unknown_node_is_rejected() {
        let tree = crate::network::Tree::canonical().unwrap();
        let cluster = Cluster::spawn(&tree, NodeId(1), &Default::default()).await.unwrap();

        let result = OperatorCommand::Enter(NodeId(42)).apply(&cluster).await;
        assert!(matches!(result, Err(MutexError::UnknownNode(NodeId(42)))));
        OperatorCommand::Print(None).apply(&cluster).await.unwrap();

        cluster.shutdown();
    }
}
