use loramesh::{
    network::SendError,
    simulation::{ScenarioMessage, Simulation},
    Node,
};
use prettytable::{row, Table};

/// Print the forward routing table of `node`, including invalidated entries.
pub fn print_routes(node: &Node) {
    let mut table = Table::new();
    table.add_row(row![
        "Destination",
        "Next Hop",
        "Metric",
        "Seq No",
        "Precursors",
        "Valid"
    ]);

    for route in node.routes() {
        let precursors = route
            .precursors()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(row![
            route.destination(),
            route.next_hop(),
            route.metric(),
            route.sequence_number(),
            precursors,
            if route.is_valid() { "yes" } else { "no" },
        ]);
    }

    table.printstd();
}

/// Print the reverse routing table of `node`.
pub fn print_reverse_routes(node: &Node) {
    let mut table = Table::new();
    table.add_row(row![
        "Destination",
        "Source",
        "RREQ Id",
        "Precursor",
        "Metric",
        "Age"
    ]);

    for entry in node.reverse_routes() {
        table.add_row(row![
            entry.destination(),
            entry.source(),
            entry.rreq_id(),
            entry.precursor(),
            entry.metric(),
            format!("{}s", entry.seen().elapsed().as_secs()),
        ]);
    }

    table.printstd();
}

/// Print the outcome of every scenario message, followed by the routing table of every node.
pub fn print_simulation(
    simulation: &Simulation,
    outcomes: &[(ScenarioMessage, Result<(), SendError>)],
) {
    let mut table = Table::new();
    table.add_row(row!["Sender", "Receiver", "Text", "Outcome"]);
    for (message, result) in outcomes {
        table.add_row(row![
            message.sender,
            message.receiver,
            message.text(),
            match result {
                Ok(()) => "sent".to_string(),
                Err(e) => e.to_string(),
            },
        ]);
    }
    table.printstd();

    for node in simulation.nodes() {
        println!();
        println!(
            "Node {} ({} transmissions)",
            node.address(),
            simulation.medium().transmissions(node.address())
        );
        print_routes(node);
    }
}
