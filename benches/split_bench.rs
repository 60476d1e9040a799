use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tabql::engine::Engine;
use tabql::record::split::split_quoted;
use tabql::record::Policy;

fn generate_csv_data(num_rows: usize, quoted_share: usize) -> String {
    let mut data = String::new();
    for i in 0..num_rows {
        if quoted_share > 0 && i % quoted_share == 0 {
            data.push_str(&format!(
                "{},\"Name, {}\",\"said \"\"hi\"\"\",note {}\n",
                i, i, i
            ));
        } else {
            data.push_str(&format!("{},Name {},plain,note {}\n", i, i, i));
        }
    }
    data
}

fn bench_split_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_throughput");

    for (label, quoted_share) in [("plain", 0), ("some_quotes", 10), ("all_quotes", 1)] {
        let data = generate_csv_data(10_000, quoted_share);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("split_quoted", label),
            &data,
            |b, data| {
                b.iter(|| {
                    let mut fields = 0;
                    for line in data.lines() {
                        let (split, _) = split_quoted(black_box(line), ',', false);
                        fields += split.len();
                    }
                    black_box(fields)
                })
            },
        );
    }

    group.finish();
}

fn bench_split_modes(c: &mut Criterion) {
    let line = " \"aaa,bbb\" ,  \"ccc,ddd\" ,plain,\"say \"\"hi\"\"\",last";

    let mut group = c.benchmark_group("split_modes");
    group.bench_function("unquoted", |b| {
        b.iter(|| split_quoted(black_box(line), ',', false))
    });
    group.bench_function("preserved", |b| {
        b.iter(|| split_quoted(black_box(line), ',', true))
    });
    group.finish();
}

fn bench_end_to_end_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_throughput");

    for rows in [1_000, 10_000] {
        let data = generate_csv_data(rows, 10);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("filter_project", format!("{}_rows", rows)),
            &data,
            |b, data| {
                let engine = Engine::new(',', Policy::Quoted).with_output_format('\t', Policy::Simple);
                b.iter(|| {
                    let mut out = Vec::new();
                    let bus = engine
                        .run(
                            "select NR, a2 where int(a1) % 2 == 0",
                            black_box(data.as_bytes()),
                            &mut out,
                        )
                        .unwrap();
                    black_box((out.len(), bus.has_warnings()))
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_split_throughput,
    bench_split_modes,
    bench_end_to_end_query,
);

criterion_main!(benches);
