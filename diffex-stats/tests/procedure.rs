//! End-to-end runs of the fitting ladder and Wald test on synthetic counts
//! with known structure.

use diffex_stats::{fit_all, wald_test, Contrast, CountDataSet, TestOptions};
use ndarray::{array, Array2};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn dataset(counts: Array2<f64>, genes: &[&str], n_ref: usize, n_alt: usize) -> CountDataSet {
    let gene_ids = genes.iter().map(|g| g.to_string()).collect();
    let n = n_ref + n_alt;
    let sample_ids = (0..n).map(|k| format!("s{k}")).collect();
    let mut conditions = vec!["control".to_string(); n_ref];
    conditions.extend(vec!["treated".to_string(); n_alt]);
    CountDataSet::new(counts, gene_ids, sample_ids, conditions).unwrap()
}

#[test]
fn recovers_directional_signals_and_nulls() {
    init_logs();
    // Four control then four treated samples; the labelled genes go up,
    // down or stay flat by construction.
    let counts = array![
        [100.0, 115.0, 95.0, 108.0, 405.0, 380.0, 430.0, 395.0],
        [400.0, 390.0, 380.0, 410.0, 95.0, 105.0, 100.0, 110.0],
        [200.0, 210.0, 190.0, 205.0, 195.0, 205.0, 215.0, 188.0],
        [55.0, 62.0, 48.0, 58.0, 60.0, 52.0, 57.0, 49.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [1000.0, 980.0, 1020.0, 995.0, 1010.0, 990.0, 1005.0, 1015.0],
        [30.0, 25.0, 35.0, 28.0, 62.0, 55.0, 70.0, 58.0],
        [150.0, 160.0, 140.0, 155.0, 148.0, 158.0, 152.0, 145.0],
    ];
    let genes = [
        "up", "down", "flat_mid", "flat_low", "zero", "flat_high", "weak_up", "flat_tight",
    ];
    let mut ds = dataset(counts, &genes, 4, 4);
    fit_all(&mut ds, true).unwrap();

    // Library sizes are balanced, so the size factors sit near one.
    for &s in ds.size_factors().unwrap() {
        assert!(s > 0.8 && s < 1.2, "size factor {s} out of range");
    }
    // Groups of four are below the replacement threshold.
    assert_eq!(ds.n_refitted(), Some(0));

    let res = wald_test(
        &ds,
        &Contrast::new("treated", "control"),
        &TestOptions { cooks_filter: false },
    )
    .unwrap();
    assert_eq!(res.gene_ids, genes);

    // up: quadruples, down: quarters, weak_up: doubles.
    assert!(res.log2_fold_change[0] > 1.5 && res.log2_fold_change[0] < 2.5);
    assert!(res.padj[0] < 1e-3);
    assert!(res.log2_fold_change[1] < -1.5 && res.log2_fold_change[1] > -2.5);
    assert!(res.padj[1] < 1e-3);
    assert!(res.log2_fold_change[6] > 0.5 && res.log2_fold_change[6] < 1.5);
    assert!(res.padj[6] < 1e-3);

    for i in [2usize, 3, 5, 7] {
        assert!(
            res.log2_fold_change[i].abs() < 0.5,
            "{} moved: {}",
            genes[i],
            res.log2_fold_change[i]
        );
        assert!(res.padj[i] > 0.05, "{} significant: {}", genes[i], res.padj[i]);
    }

    // The all-zero gene reports a base mean of zero and NaN statistics.
    assert_eq!(res.base_mean[4], 0.0);
    assert!(res.log2_fold_change[4].is_nan());
    assert!(res.pvalue[4].is_nan());
    assert!(res.padj[4].is_nan());
}

#[test]
fn replaces_count_outliers_when_groups_are_large() {
    init_logs();
    // Eight replicates per group, one wild count in an otherwise flat gene.
    let counts = array![
        [
            200.0, 215.0, 190.0, 205.0, 4000.0, 195.0, 220.0, 185.0, 210.0, 190.0, 200.0, 205.0,
            215.0, 195.0, 185.0, 208.0
        ],
        [
            80.0, 95.0, 70.0, 88.0, 92.0, 75.0, 85.0, 90.0, 320.0, 360.0, 290.0, 340.0, 310.0,
            355.0, 330.0, 300.0
        ],
        [
            500.0, 520.0, 480.0, 510.0, 490.0, 505.0, 515.0, 485.0, 495.0, 510.0, 500.0, 478.0,
            525.0, 490.0, 512.0, 502.0
        ],
        [
            120.0, 130.0, 110.0, 125.0, 118.0, 122.0, 128.0, 115.0, 124.0, 119.0, 126.0, 112.0,
            130.0, 121.0, 117.0, 127.0
        ],
        [
            60.0, 55.0, 65.0, 58.0, 62.0, 54.0, 66.0, 59.0, 57.0, 63.0, 52.0, 61.0, 64.0, 56.0,
            60.0, 58.0
        ],
        [
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0
        ],
    ];
    let genes = ["spiked_flat", "up", "flat_high", "flat_mid", "flat_low", "zero"];
    let mut ds = dataset(counts, &genes, 8, 8);
    fit_all(&mut ds, true).unwrap();

    // Only the spiked gene crosses the Cook's cutoff.
    assert_eq!(ds.n_refitted(), Some(1));

    let res = wald_test(
        &ds,
        &Contrast::new("treated", "control"),
        &TestOptions { cooks_filter: false },
    )
    .unwrap();

    // With the spike replaced by the trimmed mean, the gene is flat again.
    assert!(
        res.log2_fold_change[0].abs() < 0.5,
        "spiked gene kept a fold change of {}",
        res.log2_fold_change[0]
    );
    // The genuine signal survives the refit untouched.
    assert!(res.log2_fold_change[1] > 1.5);
    assert!(res.padj[1] < 1e-3);
    assert!(res.padj[0].is_nan() || res.padj[0] > 0.05);
    assert!(res.pvalue[5].is_nan());
}

#[test]
fn cooks_filtering_censors_outlier_pvalues() {
    init_logs();
    // Groups of four: big enough for Cook's filtering, too small for
    // outlier replacement, so the flagged p-value stays censored.
    let counts = array![
        [210.0, 195.0, 205.0, 3000.0, 200.0, 190.0, 215.0, 205.0],
        [100.0, 110.0, 90.0, 105.0, 400.0, 380.0, 420.0, 390.0],
        [250.0, 240.0, 260.0, 245.0, 255.0, 238.0, 262.0, 248.0],
        [60.0, 55.0, 65.0, 58.0, 57.0, 63.0, 52.0, 61.0],
        [500.0, 520.0, 480.0, 510.0, 495.0, 505.0, 515.0, 490.0],
        [120.0, 130.0, 110.0, 125.0, 118.0, 124.0, 114.0, 122.0],
    ];
    let genes = ["spiked", "up", "flat_a", "flat_b", "flat_c", "flat_d"];
    let mut ds = dataset(counts, &genes, 4, 4);
    fit_all(&mut ds, false).unwrap();
    assert_eq!(ds.n_refitted(), None);

    let censored = wald_test(
        &ds,
        &Contrast::new("treated", "control"),
        &TestOptions { cooks_filter: true },
    )
    .unwrap();
    assert!(censored.pvalue[0].is_nan());
    assert!(censored.padj[0].is_nan());
    assert!(censored.padj[1] < 1e-3);
    for i in 2..6 {
        assert!(censored.pvalue[i].is_finite());
    }

    let open = wald_test(
        &ds,
        &Contrast::new("treated", "control"),
        &TestOptions { cooks_filter: false },
    )
    .unwrap();
    assert!(open.pvalue[0].is_finite());
}
