use colored::Colorize;
use itertools::Itertools;

use crate::middle::graph::{GraphView, MemoryTag, Node, NodeId, op::Op};

/// One line per live node: `%id = op [inputs] : type`, followed by the
/// control and memory edges of the node if it has any
pub fn pretty_print_graph(view: GraphView<'_>) -> String {
    view.nodes()
        .map(|(id, node)| format_node(view, id, node))
        .join("\n")
}

fn format_node(view: GraphView<'_>, id: NodeId, node: &Node) -> String {
    let mut line = format!(
        "{} {} {}",
        id.to_string().bright_red(),
        "=".white(),
        format_op(&node.op)
    );

    if !node.inputs.is_empty() {
        line += &format!(
            " [{}]",
            node.inputs.iter().map(|input| input.to_string()).join(", ")
        );
    }

    line += &format!(" {} {}", ":".white(), node.ty.to_string().blue());

    if let Some(control) = view.control(id) {
        line += &format!(" {}{control}", "ctrl=".white());
    }

    if let Some(memory) = view.memory(id) {
        let tag = match memory.tag {
            MemoryTag::Slot(slot) => format!("#{slot}"),
            MemoryTag::Unknown => "?".into(),
            MemoryTag::Heap => "heap".into(),
        };

        line += &format!(" {}{}", "mem=".white(), memory.previous);

        if let Some(target) = memory.target {
            line += &format!("@{target}");
        }

        line += &format!("{}", tag.purple());
    }

    if view.roots().contains(&id) {
        line += &format!(" {}", "root".yellow());
    }

    line
}

fn format_op(op: &Op) -> String {
    let text = op.to_string();

    match op {
        Op::Error(_) => text.red().to_string(),
        Op::Start
        | Op::Function(_)
        | Op::BranchTrue
        | Op::BranchFalse
        | Op::Region
        | Op::Loop
        | Op::Return
        | Op::Exit => text.magenta().to_string(),
        Op::Load { .. } | Op::Store { .. } | Op::Alloca(_) | Op::Call => text.cyan().to_string(),
        _ => text.green().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{
        graph::{Graph, op::BinaryOp},
        lattice::Type,
    };

    #[test]
    fn prints_one_line_per_node() {
        colored::control::set_override(false);

        let mut graph = Graph::new();
        let a = graph.create(Op::Constant, Type::int(1), &[]);
        let b = graph.create(Op::Binary(BinaryOp::Add), Type::int_type(), &[a, a]);
        graph.mark_root(b);

        let printed = pretty_print_graph(graph.view());
        let lines = printed.lines().collect_vec();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "%0 = constant : untyped int:1");
        assert_eq!(lines[1], "%1 = binary.add [%0, %0] : int root");
    }
}
