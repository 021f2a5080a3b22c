/*
    Raymond's tree-based mutual exclusion. A single privilege lives on a static
    spanning tree; every node points its holder at the neighbor toward the
    privilege, and requests travel up those pointers while the privilege
    travels back down, one hop at a time. Each node keeps a FIFO of requesters
    and at most one outstanding request of its own.

    A node may be told to crash. It forgets its protocol state, asks every
    neighbor to RESTART it and rebuilds its state from their
    ADVISE replies. Requests and grants that reach it while it is recovering
    are held back and replayed once the reconstruction is complete.

    The binary spawns the ten-node tree of Raymond's paper and reads operator
    commands from stdin:

        enter <node>    ask for the critical section on behalf of <node>
        crash <node>    crash <node> and start its recovery
        print <node>    log the state of <node>
        print all       log the state of every node
        quit
*/

use std::{env, error::Error, time::Duration};

use rand::seq::IteratorRandom;
use tokio::io::{AsyncBufReadExt, BufReader};

use raymond_mutex::{
    common::{ClusterConfig, MutexError, NodeId},
    network::{Cluster, Tree},
    operator::OperatorCommand,
};

struct Options {
    hold: Option<Duration>,
    mailbox_capacity: Option<usize>,
    origin: Option<NodeId>,
}

fn parse_options() -> Result<Options, MutexError> {
    let mut options = Options {
        hold: None,
        mailbox_capacity: None,
        origin: None,
    };
    let mut args = env::args().skip(1);
    while let Some(flag) = args.next() {
        let value = args
            .next()
            .ok_or_else(|| MutexError::InvalidCommand(format!("{flag} needs a value")))?;
        match flag.as_str() {
            "--hold-ms" => {
                let millis = value
                    .parse::<u64>()
                    .map_err(|_| MutexError::InvalidCommand(format!("bad --hold-ms: {value}")))?;
                options.hold = Some(Duration::from_millis(millis));
            }
            "--mailbox-capacity" => {
                let capacity = value.parse::<usize>().map_err(|_| {
                    MutexError::InvalidCommand(format!("bad --mailbox-capacity: {value}"))
                })?;
                options.mailbox_capacity = Some(capacity);
            }
            "--origin" => options.origin = Some(value.parse()?),
            _ => return Err(MutexError::InvalidCommand(format!("unknown flag {flag}"))),
        }
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_options()?;
    let tree = Tree::canonical()?;
    let mut config = ClusterConfig::default();
    if let Some(hold) = options.hold {
        config = config.with_hold(hold);
    }
    if let Some(capacity) = options.mailbox_capacity {
        config = config.with_mailbox_capacity(capacity);
    }
    let origin = match options.origin {
        Some(origin) => origin,
        None => tree
            .nodes()
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| MutexError::InvalidTopology("empty tree".to_string()))?,
    };

    let cluster = Cluster::spawn(&tree, origin, &config).await?;
    log::info!("ready, commands: enter <node> | crash <node> | print <node> | print all | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<OperatorCommand>() {
            Ok(command) => command,
            Err(e) => {
                log::warn!("{}", e);
                continue;
            }
        };
        if command == OperatorCommand::Quit {
            break;
        }
        if let Err(e) = command.apply(&cluster).await {
            log::warn!("{}", e);
        }
    }

    cluster.shutdown();
    Ok(())
}
