use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::{CompareArgs, SweepArgs};
use crate::commands::qrels::load_queries;
use crate::model::QuerySet;
use crate::sweep::{
    COMPARISON_CSV_FILE, ChunkConfig, ConfigRow, ConfigRowReport, METRICS_CSV_FILE,
    SUMMARY_JSON_FILE, StepStatus, SweepSummary, discover_configs, evaluate_config, load_plan,
    render_comparison_csv, render_metrics_csv, run_step,
};
use crate::util::{ensure_directory, now_utc_string, write_json_pretty, write_text};

const SWEEP_SUMMARY_VERSION: u32 = 1;

/// What to do with a configuration that has no dense run on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingBaseRun {
    /// Requested sizes must all produce a run.
    Fail,
    /// Discovered directories may be incomplete.
    Skip,
}

pub fn run(args: SweepArgs) -> Result<()> {
    if args.k == 0 {
        bail!("--k must be at least 1");
    }
    if args.sizes.is_empty() || args.sizes.contains(&0) {
        bail!("--sizes must list positive chunk sizes");
    }
    if !(0.0..1.0).contains(&args.overlap_frac) {
        bail!("--overlap-frac must be in [0, 1), got {}", args.overlap_frac);
    }

    let queries = load_queries(&args.queries)?;
    ensure_directory(&args.sweep_root)?;

    let mut sizes = args.sizes.clone();
    sizes.sort_unstable();
    sizes.dedup();
    let configs = sizes
        .iter()
        .map(|size| ChunkConfig::planned(&args.sweep_root, *size, args.overlap_frac))
        .collect::<Vec<ChunkConfig>>();

    if let Some(plan_path) = &args.plan {
        let plan = load_plan(plan_path)?;
        info!(
            path = %plan_path.display(),
            steps = plan.steps.len(),
            configs = configs.len(),
            "running sweep plan"
        );
        for config in &configs {
            ensure_directory(&config.dir)?;
            let mut ran = 0usize;
            let mut skipped = 0usize;
            for step in &plan.steps {
                match run_step(step, config, &args.queries, args.force)? {
                    StepStatus::Ran => ran += 1,
                    StepStatus::Skipped => skipped += 1,
                }
            }
            info!(
                chunk_size = config.chunk_size,
                overlap = config.overlap,
                ran,
                skipped,
                "pipeline finished for configuration"
            );
        }
    } else {
        info!("no --plan given, evaluating existing configuration outputs");
    }

    let rows = evaluate_all(&configs, &queries, args.k, MissingBaseRun::Fail)?;
    write_outputs(&args.sweep_root, &rows, args.k)
}

pub fn compare(args: CompareArgs) -> Result<()> {
    if args.k == 0 {
        bail!("--k must be at least 1");
    }

    let queries = load_queries(&args.queries)?;
    let configs = discover_configs(&args.sweep_root)?;
    if configs.is_empty() {
        bail!(
            "no chunk_<size> directories found under {}",
            args.sweep_root.display()
        );
    }
    info!(
        sweep_root = %args.sweep_root.display(),
        configs = configs.len(),
        "comparing configurations"
    );

    let rows = evaluate_all(&configs, &queries, args.k, MissingBaseRun::Skip)?;
    write_outputs(&args.sweep_root, &rows, args.k)
}

fn evaluate_all(
    configs: &[ChunkConfig],
    queries: &QuerySet,
    k: usize,
    missing: MissingBaseRun,
) -> Result<Vec<ConfigRow>> {
    let mut rows = Vec::<ConfigRow>::with_capacity(configs.len());
    for config in configs {
        let base_run = config.base_run_path();
        if !base_run.exists() {
            if missing == MissingBaseRun::Fail {
                bail!(
                    "dense run missing for chunk_{}: {}",
                    config.chunk_size,
                    base_run.display()
                );
            }
            warn!(
                chunk_size = config.chunk_size,
                path = %base_run.display(),
                "dense run missing, skipping configuration"
            );
            continue;
        }
        rows.push(evaluate_config(config, queries, k)?);
    }
    if rows.is_empty() {
        bail!("no configuration had a dense run to evaluate");
    }
    Ok(rows)
}

fn write_outputs(sweep_root: &Path, rows: &[ConfigRow], k: usize) -> Result<()> {
    let metrics_path = sweep_root.join(METRICS_CSV_FILE);
    write_text(&metrics_path, &render_metrics_csv(rows, k))?;

    let comparison_path = sweep_root.join(COMPARISON_CSV_FILE);
    let reranked = rows.iter().filter(|row| row.reranked.is_some()).count();
    if reranked > 0 {
        write_text(&comparison_path, &render_comparison_csv(rows, k))?;
    } else {
        info!("no reranked runs found, skipping base vs rerank comparison");
    }

    let mut sorted = rows.iter().collect::<Vec<&ConfigRow>>();
    sorted.sort_by_key(|row| row.chunk_size);
    let summary = SweepSummary {
        manifest_version: SWEEP_SUMMARY_VERSION,
        generated_at: now_utc_string(),
        sweep_root: sweep_root.display().to_string(),
        k,
        rows: sorted.into_iter().map(ConfigRowReport::from).collect(),
    };
    let summary_path = sweep_root.join(SUMMARY_JSON_FILE);
    write_json_pretty(&summary_path, &summary)?;

    info!(
        metrics = %metrics_path.display(),
        summary = %summary_path.display(),
        rows = rows.len(),
        reranked_rows = reranked,
        "wrote sweep results"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::sweep::{BASE_RUN_FILE, META_RELATIVE_PATH, RERANK_RUN_FILE};

    const META: &str = concat!(
        "{\"paper_id\":\"p1\",\"chunk_id\":0,\"passage\":\"a\"}\n",
        "{\"paper_id\":\"p2\",\"chunk_id\":0,\"passage\":\"b\"}\n",
    );

    fn write_queries(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("dev.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"qid\":\"q1\",\"query\":\"one\",\"paper_id\":\"p1\"}\n",
                "{\"qid\":\"q2\",\"query\":\"two\",\"paper_id\":\"p2\"}\n",
            ),
        )
        .expect("write queries");
        path
    }

    fn write_config(root: &Path, size: u32, base: &str, rerank: Option<&str>) {
        let dir = root.join(format!("chunk_{size}"));
        fs::create_dir_all(dir.join("index")).expect("create dir");
        fs::write(dir.join(META_RELATIVE_PATH), META).expect("write meta");
        fs::write(dir.join(BASE_RUN_FILE), base).expect("write base");
        if let Some(rerank) = rerank {
            fs::write(dir.join(RERANK_RUN_FILE), rerank).expect("write rerank");
        }
    }

    #[test]
    fn compare_writes_both_csvs_and_summary() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queries = write_queries(dir.path());
        let root = dir.path().join("sweep");
        write_config(
            &root,
            100,
            "q1 Q0 p2:0 1 0.9 faiss\nq1 Q0 p1:0 2 0.8 faiss\nq2 Q0 p2:0 1 0.9 faiss\n",
            Some("q1 Q0 p1:0 1 2.0 ce\nq2 Q0 p2:0 1 2.0 ce\n"),
        );
        write_config(&root, 50, "q1 Q0 p1:0 1 0.9 faiss\nq2 Q0 p2:0 1 0.9 faiss\n", None);

        compare(CompareArgs {
            sweep_root: root.clone(),
            queries,
            k: 10,
        })
        .expect("compare succeeds");

        let metrics = fs::read_to_string(root.join(METRICS_CSV_FILE)).expect("metrics csv");
        let lines = metrics.lines().collect::<Vec<&str>>();
        assert_eq!(lines[0], "chunk_size,overlap,NDCG@10,MRR@10,Recall@10");
        assert_eq!(lines[1], "50,,1.0000,1.0000,1.0000");
        assert!(lines[2].starts_with("100,,"));

        let comparison =
            fs::read_to_string(root.join(COMPARISON_CSV_FILE)).expect("comparison csv");
        let lines = comparison.lines().collect::<Vec<&str>>();
        assert!(lines[1].starts_with("50,1.0000,1.0000,1.0000,,,"));
        assert!(lines[2].ends_with(",0.2500,0.0000"), "{}", lines[2]);

        let summary = fs::read_to_string(root.join(SUMMARY_JSON_FILE)).expect("summary");
        let summary: serde_json::Value = serde_json::from_str(&summary).expect("summary json");
        assert_eq!(summary["rows"][0]["chunk_size"], 50);
        assert!(summary["rows"][0]["reranked"].is_null());
    }

    #[test]
    fn compare_fails_without_chunk_dirs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queries = write_queries(dir.path());
        let root = dir.path().join("empty");
        fs::create_dir_all(&root).expect("create root");

        let error = compare(CompareArgs {
            sweep_root: root,
            queries,
            k: 10,
        })
        .expect_err("nothing to compare");
        assert!(error.to_string().contains("chunk_<size>"), "{error}");
    }

    #[test]
    fn sweep_without_plan_evaluates_existing_outputs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queries = write_queries(dir.path());
        let root = dir.path().join("sweep");
        write_config(&root, 200, "q1 Q0 p1:0 1 0.9 faiss\n", None);

        run(SweepArgs {
            sweep_root: root.clone(),
            queries,
            sizes: vec![200],
            overlap_frac: 0.3,
            plan: None,
            force: false,
            k: 10,
        })
        .expect("sweep succeeds");

        let metrics = fs::read_to_string(root.join(METRICS_CSV_FILE)).expect("metrics csv");
        let lines = metrics.lines().collect::<Vec<&str>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("200,60,"));
        assert!(!root.join(COMPARISON_CSV_FILE).exists());
    }

    #[test]
    fn sweep_fails_when_a_requested_size_has_no_dense_run() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queries = write_queries(dir.path());
        let root = dir.path().join("sweep");
        write_config(&root, 200, "q1 Q0 p1:0 1 0.9 faiss\n", None);

        let error = run(SweepArgs {
            sweep_root: root.clone(),
            queries,
            sizes: vec![200, 300],
            overlap_frac: 0.3,
            plan: None,
            force: false,
            k: 10,
        })
        .expect_err("chunk_300 has no run");
        assert!(error.to_string().contains("chunk_300"), "{error}");
        assert!(!root.join(METRICS_CSV_FILE).exists());
    }

    #[test]
    fn compare_skips_discovered_dir_without_dense_run() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queries = write_queries(dir.path());
        let root = dir.path().join("sweep");
        write_config(&root, 200, "q1 Q0 p1:0 1 0.9 faiss\n", None);
        fs::create_dir_all(root.join("chunk_300")).expect("create dir");

        compare(CompareArgs {
            sweep_root: root.clone(),
            queries,
            k: 10,
        })
        .expect("compare succeeds");

        let metrics = fs::read_to_string(root.join(METRICS_CSV_FILE)).expect("metrics csv");
        assert_eq!(metrics.lines().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn sweep_with_plan_runs_steps_then_evaluates_each_size() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queries = write_queries(dir.path());
        let fixtures = dir.path().join("fixtures");
        fs::create_dir_all(&fixtures).expect("create fixtures");
        fs::write(fixtures.join("meta.jsonl"), META).expect("write meta fixture");
        // chunk_50 retrieves both papers first, chunk_100 misses q1
        fs::write(
            fixtures.join("faiss_50.trec"),
            "q1 Q0 p1:0 1 0.9 faiss\nq2 Q0 p2:0 1 0.9 faiss\n",
        )
        .expect("write run fixture");
        fs::write(
            fixtures.join("faiss_100.trec"),
            "q1 Q0 p2:0 1 0.9 faiss\nq2 Q0 p2:0 1 0.9 faiss\n",
        )
        .expect("write run fixture");

        let plan = serde_json::json!({
            "steps": [
                {
                    "name": "index",
                    "program": "mkdir",
                    "args": ["-p", "{config_dir}/index"]
                },
                {
                    "name": "chunk",
                    "program": "cp",
                    "args": [fixtures.join("meta.jsonl").display().to_string(), "{meta}"],
                    "creates": "{meta}"
                },
                {
                    "name": "search",
                    "program": "cp",
                    "args": [
                        format!("{}/faiss_{{chunk_size}}.trec", fixtures.display()),
                        "{base_run}"
                    ],
                    "creates": "{base_run}"
                }
            ]
        });
        let plan_path = dir.path().join("plan.json");
        fs::write(&plan_path, plan.to_string()).expect("write plan");

        let root = dir.path().join("sweep");
        run(SweepArgs {
            sweep_root: root.clone(),
            queries,
            sizes: vec![100, 50],
            overlap_frac: 0.3,
            plan: Some(plan_path),
            force: false,
            k: 10,
        })
        .expect("sweep succeeds");

        assert!(root.join("chunk_50").join(BASE_RUN_FILE).exists());
        let metrics = fs::read_to_string(root.join(METRICS_CSV_FILE)).expect("metrics csv");
        let lines = metrics.lines().collect::<Vec<&str>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "50,15,1.0000,1.0000,1.0000");
        assert_eq!(lines[2], "100,30,0.5000,0.5000,0.5000");
    }

    #[cfg(unix)]
    #[test]
    fn sweep_fails_when_a_plan_step_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queries = write_queries(dir.path());
        let plan_path = dir.path().join("plan.json");
        fs::write(
            &plan_path,
            r#"{"steps":[{"name":"search","program":"false","args":[]}]}"#,
        )
        .expect("write plan");

        let error = run(SweepArgs {
            sweep_root: dir.path().join("sweep"),
            queries,
            sizes: vec![50],
            overlap_frac: 0.3,
            plan: Some(plan_path),
            force: false,
            k: 10,
        })
        .expect_err("step exits non-zero");
        assert!(error.to_string().contains("search"), "{error}");
    }

    #[test]
    fn sweep_rejects_bad_overlap_fraction() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queries = write_queries(dir.path());
        let result = run(SweepArgs {
            sweep_root: dir.path().join("sweep"),
            queries,
            sizes: vec![100],
            overlap_frac: 1.5,
            plan: None,
            force: false,
            k: 10,
        });
        assert!(result.is_err());
    }
}
