use adaptive_dash::aggregate::{AggregationPlan, compute_aggregations};
use adaptive_dash::capabilities::detect_capabilities;
use adaptive_dash::dataset::Dataset;
use adaptive_dash::layout::compile_layout;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

const STAGES: [&str; 5] = [
    "st_entrada",
    "st_qualificado",
    "st_agendado",
    "st_realizado",
    "st_venda",
];

fn generate_leads(rows: usize) -> Dataset {
    let mut headers = vec![
        "dia".to_string(),
        "canal".to_string(),
        "valor_venda".to_string(),
    ];
    headers.extend(STAGES.iter().map(|s| s.to_string()));
    let records: Vec<Vec<String>> = (0..rows)
        .map(|i| {
            let canal = match i % 4 {
                0 => "google",
                1 => "meta",
                2 => "organico",
                _ => "indicacao",
            };
            let mut record = vec![
                format!("2024-{:02}-{:02}", i % 12 + 1, i % 28 + 1),
                canal.to_string(),
                format!("{}.50", (i % 97) * 10),
            ];
            record.extend((0..STAGES.len()).map(|stage| {
                if i % (stage + 2) == 0 { "1" } else { "0" }.to_string()
            }));
            record
        })
        .collect();
    Dataset::from_records(&headers, &records)
}

fn bench_layout_aggregation(c: &mut Criterion) {
    let data = generate_leads(20_000);
    let caps = detect_capabilities(&data.columns, &data.rows);
    let layout = compile_layout(&caps, None)
        .layout
        .expect("layout compiles");
    let plan = AggregationPlan::from_layout(&layout);

    let mut group = c.benchmark_group("aggregation");
    group.sample_size(20);
    group.bench_function("detect_capabilities", |b| {
        b.iter(|| detect_capabilities(&data.columns, &data.rows))
    });
    group.bench_function("compile_layout", |b| {
        b.iter(|| compile_layout(&caps, None))
    });
    group.bench_function("aggregate_full_plan", |b| {
        b.iter_batched(
            || plan.clone(),
            |plan| compute_aggregations(&data, &plan, None),
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_layout_aggregation);
criterion_main!(benches);
