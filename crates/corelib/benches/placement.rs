use corelib::node::NodeRef;
use corelib::partitioner::HashAlgorithm;
use corelib::token::HashSpace;
use corelib::topology::Topology;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_partitioners(c: &mut Criterion) {
    let space = HashSpace::new(48).unwrap();
    for algorithm in [HashAlgorithm::Blake3, HashAlgorithm::Xxh3, HashAlgorithm::Sip13] {
        let partitioner = algorithm.partitioner(space);
        c.bench_function(&format!("partition/{algorithm}"), |b| {
            b.iter(|| partitioner.partition_str(black_box("sensors/building-7/temperature")))
        });
    }
}

fn bench_owner_lookup(c: &mut Criterion) {
    let space = HashSpace::new(48).unwrap();
    let partitioner = HashAlgorithm::Blake3.partitioner(space);
    let nodes = (0..256u16).map(|i| NodeRef::new("10.0.0.1", 5000 + i, partitioner.as_ref()));
    let topology = Topology::new(space, nodes).unwrap();
    let token = partitioner.partition_str("humidity");
    c.bench_function("topology/owner_of/256", |b| {
        b.iter(|| topology.owner_of(black_box(token)))
    });
}

criterion_group!(benches, bench_partitioners, bench_owner_lookup);
criterion_main!(benches);
