//! VM benchmarks using criterion.
//!
//! Run with: cargo bench --bench vm_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use rill_bytecode::{BinOp, Instruction, LexAddr, Literal, Program};
use rill_vm::heap::{Heap, NoRoots, NODE_BYTES};
use rill_vm::{builtins, Vm, VmConfig};

fn bench_heap_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_allocation");
    group.throughput(Throughput::Elements(1));

    group.bench_function("number_churn", |b| {
        let mut heap = Heap::new(64 * NODE_BYTES).unwrap();
        let mut i = 0.0f64;
        b.iter(|| {
            i += 1.0;
            black_box(heap.allocate_number(&NoRoots, i).unwrap())
        });
    });

    group.bench_function("string_intern_hit", |b| {
        let mut heap = Heap::new(64 * NODE_BYTES).unwrap();
        let first = heap.allocate_string(&NoRoots, "interned").unwrap();
        b.iter(|| {
            let again = heap.allocate_string(&[first], "interned").unwrap();
            black_box(again)
        });
    });

    group.bench_function("collect_small_live_set", |b| {
        let mut heap = Heap::new(64 * NODE_BYTES).unwrap();
        let mut roots: Vec<rill_vm::Addr> = Vec::new();
        for i in 0..16 {
            let addr = heap.allocate_number(&roots, i as f64).unwrap();
            roots.push(addr);
        }
        b.iter(|| heap.collect(black_box(&roots)));
    });

    group.finish();
}

/// A counting loop: the steady-state instruction mix of real programs
/// (loads, stores, arithmetic, a conditional jump).
fn counting_program(n: f64) -> Program {
    Program::new(vec![
        Instruction::EnterScope { locals: 1 },
        Instruction::LoadConst(Literal::Number(0.0)),
        Instruction::Store {
            name: "i".into(),
            addr: LexAddr::new(0, 0),
        },
        Instruction::Pop,
        // 4: loop head
        Instruction::Load {
            name: "i".into(),
            addr: LexAddr::new(0, 0),
        },
        Instruction::LoadConst(Literal::Number(n)),
        Instruction::BinaryOp(BinOp::Lt),
        Instruction::JumpIfFalse(14),
        Instruction::Load {
            name: "i".into(),
            addr: LexAddr::new(0, 0),
        },
        Instruction::LoadConst(Literal::Number(1.0)),
        Instruction::BinaryOp(BinOp::Add),
        Instruction::Store {
            name: "i".into(),
            addr: LexAddr::new(0, 0),
        },
        Instruction::Pop,
        Instruction::Jump(4),
        // 14:
        Instruction::ExitScope,
        Instruction::Done,
    ])
}

/// Recursive Fibonacci: call-protocol heavy.
fn fib_program(n: f64) -> Program {
    let fib = |frame, slot| Instruction::Load {
        name: "fib".into(),
        addr: LexAddr::new(frame, slot),
    };
    let narg = |frame| Instruction::Load {
        name: "n".into(),
        addr: LexAddr::new(frame, 0),
    };
    Program::new(vec![
        Instruction::EnterScope { locals: 1 },
        Instruction::MakeClosure { arity: 1, entry: 9 },
        Instruction::Store {
            name: "fib".into(),
            addr: LexAddr::new(0, 0),
        },
        Instruction::Pop,
        fib(0, 0),
        Instruction::LoadConst(Literal::Number(n)),
        Instruction::Call { argc: 1 },
        Instruction::ExitScope,
        Instruction::Done,
        // 9: body — n@(0,0), fib@(1,0)
        narg(0),
        Instruction::LoadConst(Literal::Number(2.0)),
        Instruction::BinaryOp(BinOp::Lt),
        Instruction::JumpIfFalse(15),
        narg(0),
        Instruction::Return,
        // 15: fib(n-1) + fib(n-2)
        fib(1, 0),
        narg(0),
        Instruction::LoadConst(Literal::Number(1.0)),
        Instruction::BinaryOp(BinOp::Sub),
        Instruction::Call { argc: 1 },
        fib(1, 0),
        narg(0),
        Instruction::LoadConst(Literal::Number(2.0)),
        Instruction::BinaryOp(BinOp::Sub),
        Instruction::Call { argc: 1 },
        Instruction::BinaryOp(BinOp::Add),
        Instruction::Return,
    ])
}

fn bench_interpreter(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter");

    group.bench_function("counting_loop_1k", |b| {
        let program = counting_program(1000.0);
        b.iter(|| {
            let mut vm = Vm::new(program.clone(), VmConfig::default()).unwrap();
            black_box(vm.run().unwrap())
        });
    });

    group.bench_function("fib_12_recursive", |b| {
        let program = fib_program(12.0);
        b.iter(|| {
            let mut vm = Vm::new(program.clone(), VmConfig::default()).unwrap();
            black_box(vm.run().unwrap())
        });
    });

    group.finish();
}

fn bench_global_lookup(c: &mut Criterion) {
    c.bench_function("global_slot", |b| {
        b.iter(|| black_box(builtins::global_slot(black_box("math_sqrt"))));
    });
}

criterion_group!(
    benches,
    bench_heap_allocation,
    bench_interpreter,
    bench_global_lookup
);
criterion_main!(benches);
