//! Benchmarks for gara-synth core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gara_synth::core::composer::GaraStack;
use gara_synth::core::config::GaraConfig;
use gara_synth::core::stack::{Stack, StackEnv};
use gara_synth::core::template::{CfnResource, LogicalId, Token};
use gara_synth::core::{hasher, parser, resolver};
use serde_json::json;

fn bench_build_and_synth(c: &mut Criterion) {
    let config = GaraConfig::default();
    c.bench_function("gara_stack_synth", |b| {
        b.iter(|| {
            let stack = GaraStack::build("BenchStack", black_box(&config), StackEnv::default())
                .unwrap();
            black_box(stack.synth().unwrap());
        });
    });
}

fn bench_config_parse(c: &mut Criterion) {
    let yaml = r#"
vpc:
  max_azs: 3
  nat_gateways: 2
backend_service:
  desired_count: 2
  environment_variables:
    LOG_LEVEL: debug
frontend_service:
  task_definition:
    cpu: 1024
    memory_limit_mib: 2048
backend_pipeline:
  github_source:
    branch: release
"#;
    c.bench_function("config_parse", |b| {
        b.iter(|| {
            let config = parser::parse_config(black_box(yaml)).unwrap();
            black_box(parser::validate_config(&config));
        });
    });
}

fn bench_template_hash(c: &mut Criterion) {
    let template = GaraStack::build("BenchStack", &GaraConfig::default(), StackEnv::default())
        .unwrap()
        .synth()
        .unwrap();
    c.bench_function("template_hash", |b| {
        b.iter(|| black_box(hasher::hash_template(black_box(&template))));
    });
}

fn bench_deploy_order(c: &mut Criterion) {
    // Chain of N resources, each referencing the previous one
    let mut group = c.benchmark_group("deploy_order");
    for n in [10, 50, 100] {
        let mut stack = Stack::new("Chain", StackEnv::default());
        let mut prev: Option<LogicalId> = None;
        for i in 0..n {
            let props = match &prev {
                Some(p) => json!({ "Upstream": Token::reference(p) }),
                None => json!({}),
            };
            let id = stack
                .add_resource(format!("Node{i:04}"), CfnResource::new("AWS::SNS::Topic", props))
                .unwrap();
            prev = Some(id);
        }
        group.bench_with_input(BenchmarkId::from_parameter(n), stack.template(), |b, t| {
            b.iter(|| black_box(resolver::build_deploy_order(black_box(t)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_build_and_synth,
    bench_config_parse,
    bench_template_hash,
    bench_deploy_order
);
criterion_main!(benches);
