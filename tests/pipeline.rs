use std::io::Write;

use hashbrown::HashSet;
use indoc::indoc;
use kelpc::{
    Compilation, CompileOptions, compile,
    frontend::SourceFile,
    middle::{
        graph::{
            Node, NodeId,
            op::{BinaryOp, Op},
        },
        lattice::Type,
        optimization::dce::eliminate_dead_code,
    },
};

fn build_with(source: &str, options: &CompileOptions) -> Compilation {
    compile(&SourceFile::from_memory(source), options).unwrap()
}

fn build(source: &str) -> Compilation {
    build_with(source, &CompileOptions::default())
}

fn count(compilation: &Compilation, predicate: impl Fn(&Node) -> bool) -> usize {
    compilation.graph.view().find(predicate).len()
}

/// Integer constants written by the live stores
fn stored_values(compilation: &Compilation) -> Vec<i128> {
    let graph = &compilation.graph;

    graph
        .view()
        .find(|node| matches!(node.op, Op::Store { .. }))
        .into_iter()
        .filter_map(|store| graph.ty(graph.node(store).inputs[1]).as_int())
        .collect()
}

#[test]
fn assignment_from_the_variable_itself_folds_to_a_constant() {
    let compilation = build("func main() { var x int = 1; x = x + 2; return; }");
    let graph = &compilation.graph;

    assert!(compilation.diagnostics.is_empty());
    assert_eq!(
        count(&compilation, |node| node.op == Op::Binary(BinaryOp::Add)),
        0
    );
    assert_eq!(
        count(&compilation, |node| node.op == Op::Constant
            && node.ty.as_int() == Some(3)),
        1
    );

    let last = graph
        .view()
        .find(|node| matches!(node.op, Op::Store { .. }))
        .into_iter()
        .find(|store| {
            graph
                .memory_users(*store)
                .iter()
                .any(|user| *graph.op(*user) == Op::Return)
        })
        .unwrap();

    assert_eq!(graph.ty(graph.node(last).inputs[1]).as_int(), Some(3));
}

#[test]
fn constant_if_leaves_a_single_return_value() {
    let compilation = build(indoc! {"
        func pick() int {
            if true {
                return 1;
            } else {
                return 2;
            }
        }

        func main() {
            pick();
        }
    "});

    assert!(compilation.diagnostics.is_empty());
    assert_eq!(compilation.stats.functions, 2);
    assert_eq!(
        count(&compilation, |node| node.op == Op::Constant
            && node.ty.as_int() == Some(2)),
        0
    );

    let graph = &compilation.graph;
    let returned = graph
        .view()
        .find(|node| node.op == Op::Return && !node.inputs.is_empty())
        .into_iter()
        .map(|ret| graph.ty(graph.node(ret).inputs[0]).as_int())
        .collect::<Vec<_>>();

    assert_eq!(returned, vec![Some(1)]);
}

#[test]
fn reordering_exposes_a_forwardable_load() {
    let source = indoc! {"
        func main() {
            var x int = 1;
            var y int = 2;
            var z int = x + y;
        }
    "};

    let compilation = build(source);

    assert!(compilation.stats.optimization.reordered > 0);
    assert_eq!(count(&compilation, |node| matches!(node.op, Op::Load { .. })), 0);
    assert!(stored_values(&compilation).contains(&3));

    let unordered = build_with(source, &CompileOptions {
        reorder_memory: false,
        ..CompileOptions::default()
    });

    assert_eq!(unordered.stats.optimization.reordered, 0);
    assert_eq!(count(&unordered, |node| matches!(node.op, Op::Load { .. })), 1);
    assert!(!stored_values(&unordered).contains(&3));
}

#[test]
fn unoptimized_graphs_keep_every_node() {
    let source = "func main() { var x int = 1; var y int = 2; var z int = x + y; }";

    let compilation = build_with(source, &CompileOptions {
        optimize: false,
        ..CompileOptions::default()
    });

    assert_eq!(compilation.stats.optimization.rounds, 0);
    assert_eq!(compilation.stats.optimization.removed, 0);
    assert_eq!(compilation.graph.len(), compilation.stats.constructed);
}

#[test]
fn deferred_statements_run_latest_first() {
    let compilation = build(indoc! {"
        func main() {
            var log int = 0;
            {
                defer log = log * 10 + 1;
                defer log = log * 10 + 2;
            }
            var result int = log;
        }
    "});

    let stored = stored_values(&compilation);

    assert!(compilation.diagnostics.is_empty());
    assert!(stored.contains(&21));
    assert!(!stored.contains(&12));
}

#[test]
fn deferred_statements_run_before_return() {
    let compilation = build(indoc! {"
        func main() {
            var n int = 1;
            defer n = n + 4;
            return;
        }
    "});

    assert!(stored_values(&compilation).contains(&5));
}

#[test]
fn promoted_locals_become_loop_phis() {
    let source = indoc! {"
        func count(limit int) int {
            var total int = 0;
            var i int = 0;
            for i < limit {
                total += i;
                i += 1;
            }
            return total;
        }

        func main() {
            count(10);
        }
    "};

    let promoted = build_with(source, &CompileOptions {
        promote_locals: true,
        ..CompileOptions::default()
    });

    assert!(promoted.diagnostics.is_empty());
    assert_eq!(count(&promoted, |node| matches!(node.op, Op::Alloca(_))), 0);
    assert_eq!(count(&promoted, |node| node.op == Op::Loop), 1);
    assert!(count(&promoted, |node| node.op == Op::Phi && node.ty != Type::Memory) >= 2);

    let slotted = build(source);

    assert!(slotted.diagnostics.is_empty());
    assert_eq!(count(&slotted, |node| matches!(node.op, Op::Alloca(_))), 3);
}

#[test]
fn address_taken_locals_keep_their_slot_when_promoting() {
    let compilation = build_with(
        indoc! {"
            func main() {
                var kept int = 1;
                var promoted int = 2;
                var pointer *int = &kept;
                *pointer = promoted;
            }
        "},
        &CompileOptions {
            promote_locals: true,
            ..CompileOptions::default()
        },
    );

    assert!(compilation.diagnostics.is_empty());
    assert_eq!(count(&compilation, |node| matches!(node.op, Op::Alloca(_))), 1);
}

#[test]
fn type_errors_become_diagnostics() {
    let compilation = build("func main() { var b bool = 1 + true; }");

    assert!(compilation.has_errors());
    assert!(!compilation.diagnostics.is_empty());
}

#[test]
fn sources_are_loaded_from_disk() {
    let temp = mktemp::Temp::new_file().unwrap();
    let path = temp.to_path_buf();

    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"func main() {\n    var x int = 4;\n}\n").unwrap();
    drop(file);

    let source = SourceFile::load(&path).unwrap();
    let compilation = compile(&source, &CompileOptions::default()).unwrap();

    assert!(source.origin.to_string().ends_with(&*path.file_name().unwrap().to_string_lossy()));
    assert!(stored_values(&compilation).contains(&4));
}

/// Integer constants reaching a `Return` with a value
fn returned_values(compilation: &Compilation) -> Vec<Option<i128>> {
    let graph = &compilation.graph;

    graph
        .view()
        .find(|node| node.op == Op::Return && !node.inputs.is_empty())
        .into_iter()
        .map(|ret| graph.ty(graph.node(ret).inputs[0]).as_int())
        .collect()
}

#[test]
fn overflowing_casts_are_not_folded_away_at_joins() {
    let returned = build(indoc! {"
        func pick(c bool) u8 {
            if c {
                return 300 as u8;
            }
            return 1;
        }

        func main() {
            pick(true);
        }
    "});

    assert!(returned.diagnostics.is_empty());
    assert_eq!(returned_values(&returned), vec![None]);

    let assigned = build_with(
        indoc! {"
            func pick(c bool) u8 {
                var x u8 = 1;
                if c {
                    x = 300 as u8;
                }
                return x;
            }

            func main() {
                pick(true);
            }
        "},
        &CompileOptions {
            promote_locals: true,
            ..CompileOptions::default()
        },
    );

    assert!(assigned.diagnostics.is_empty());
    assert_eq!(returned_values(&assigned), vec![None]);
}

#[test]
fn writes_through_a_parenthesized_address_reach_the_local() {
    let source = indoc! {"
        func read() int {
            var x int = 1;
            var p *int = &(x);
            *p = 5;
            return x;
        }

        func main() {
            read();
        }
    "};

    for promote_locals in [false, true] {
        let compilation = build_with(source, &CompileOptions {
            promote_locals,
            ..CompileOptions::default()
        });

        assert!(compilation.diagnostics.is_empty());
        assert_eq!(returned_values(&compilation), vec![Some(5)], "promote_locals = {promote_locals}");
    }
}

#[test]
fn loops_without_exits_keep_their_bodies() {
    let sources = [
        "func tick() {}\nfunc main() { for { tick(); } }",
        "func tick() {}\nfunc main() { for true { tick(); } }",
    ];

    for source in sources {
        let compilation = build(source);

        assert!(compilation.diagnostics.is_empty());
        assert_eq!(count(&compilation, |node| node.op == Op::Call), 2, "{source}");
        assert_eq!(count(&compilation, |node| node.op == Op::Loop), 1, "{source}");
    }
}

#[test]
fn optimized_graphs_are_closed_under_reachability() {
    let source = indoc! {"
        func sum(limit int) int {
            var total int = 0;
            var i int = 0;
            for i < limit {
                i += 1;
                if i % 2 == 0 {
                    continue;
                }
                total += i;
            }
            return total;
        }

        func main() {
            var calls int = 0;
            defer calls = calls + 1;
            if sum(10) > 20 {
                calls = sum(3);
            }
        }
    "};

    for promote_locals in [false, true] {
        let mut compilation = build_with(source, &CompileOptions {
            promote_locals,
            ..CompileOptions::default()
        });

        assert!(compilation.diagnostics.is_empty());
        assert_eq!(count(&compilation, |node| node.op == Op::Loop), 1);

        let graph = &compilation.graph;
        let mut reachable = HashSet::new();
        let mut stack = graph.roots().collect::<Vec<_>>();

        while let Some(id) = stack.pop() {
            if reachable.insert(id) {
                stack.extend(graph.dependencies(id));
            }
        }

        let live = graph
            .view()
            .nodes()
            .map(|(id, _)| id)
            .collect::<HashSet<NodeId>>();

        assert_eq!(reachable, live, "promote_locals = {promote_locals}");
        assert_eq!(eliminate_dead_code(&mut compilation.graph), 0);
    }
}
