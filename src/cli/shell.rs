use std::io;

use log::{debug, warn};
use loramesh::{address::Address, network::NetworkEvent, Node};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};

use super::{print_reverse_routes, print_routes};

const HELP: &str = "\
Commands:
  msg <destination> <text>  send a message
  routes                    show the routing table
  revroutes                 show the reverse routing table
  status                    show the node address and sequence number
  help                      show this help
  exit                      stop the node";

/// Read commands from stdin until it closes or `exit` is entered.
pub async fn shell(node: &Node) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        debug!("Shell command {command:?}");

        match command {
            "" => {}
            "msg" => {
                let Some((destination, text)) = rest.trim_start().split_once(' ') else {
                    println!("usage: msg <destination> <text>");
                    continue;
                };
                let destination = match destination.parse::<Address>() {
                    Ok(destination) => destination,
                    Err(e) => {
                        println!("Invalid destination {destination:?}: {e}");
                        continue;
                    }
                };
                match node.send_message(text, destination).await {
                    Ok(()) => println!("Message to {destination} sent"),
                    Err(e) => println!("Could not send message to {destination}: {e}"),
                }
            }
            "routes" => print_routes(node),
            "revroutes" => print_reverse_routes(node),
            "status" => println!(
                "Node {}, sequence number {}",
                node.address(),
                node.sequence_number()
            ),
            "help" => println!("{HELP}"),
            "exit" | "quit" => break,
            other => println!("Unknown command {other:?}, try help"),
        }
    }

    Ok(())
}

/// Print messages received by the node until it stops.
pub async fn print_messages(mut events: broadcast::Receiver<NetworkEvent>) {
    loop {
        match events.recv().await {
            Ok(NetworkEvent::MessageReceived {
                from,
                sequence_number,
                payload,
            }) => println!("[{from}, seqno {sequence_number}] {payload}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Missed {missed} network events");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
