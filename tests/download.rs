mod common;

use std::fs;

use assert_matches::assert_matches;
use chrono::{NaiveDateTime, TimeDelta};

use spt_dataset_manager::archive;
use spt_dataset_manager::catalog::CatalogResource;
use spt_dataset_manager::download::{
    FetchOutcome, PollPolicy, Readiness, classify_readiness,
};
use spt_dataset_manager::error::SptError;
use spt_dataset_manager::identity::IdentityStrategy;
use spt_dataset_manager::manager::DatasetManager;

use common::{MockCatalog, dataset, resource, tar_gz, tar_gz_raw_name};

fn at(value: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").unwrap()
}

fn members(cycle: &str, count: usize) -> Vec<CatalogResource> {
    (1..=count)
        .map(|member| resource(&format!("erfp-nile-blue-{cycle}-{member}"), "tar.gz"))
        .collect()
}

fn warning_points(cycle: &str, periods: &[&str]) -> Vec<CatalogResource> {
    periods
        .iter()
        .map(|period| {
            resource(
                &format!("erfp-nile-blue-{cycle}-warning_points_{period}"),
                "tar.gz",
            )
        })
        .collect()
}

fn add_member_blobs(catalog: &MockCatalog, resources: &[CatalogResource]) {
    for resource in resources {
        let member = resource.name.rsplit('-').next().unwrap();
        let file = format!("Qout_nile_blue_{member}.nc");
        catalog.add_blob(&resource.url, tar_gz(&[(file.as_str(), b"q")]));
    }
}

#[test]
fn existing_target_makes_no_calls() {
    let temp = tempfile::tempdir().unwrap();
    let manager = DatasetManager::with_defaults(MockCatalog::default(), IdentityStrategy::ecmwf());

    let outcome = manager
        .fetch_resources(&[resource("r", "tar.gz")], temp.path(), None)
        .unwrap();

    assert_eq!(outcome, FetchOutcome::AlreadyPresent);
    assert!(manager.catalog().calls().is_empty());
}

#[test]
fn escaping_member_is_rejected_before_writing() {
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("a").join("b").join("target");
    let archive_path = temp.path().join("bad.tar.gz");
    fs::write(&archive_path, tar_gz_raw_name("../../evil", b"owned")).unwrap();

    let result = archive::extract_tar_gz(&archive_path, &target);
    assert_matches!(result, Err(SptError::PathTraversal(_)));
    assert!(!temp.path().join("a").join("evil").exists());
    assert!(!target.exists());

    let catalog = MockCatalog::default();
    catalog.add_blob("mock://bad", tar_gz_raw_name("../../evil", b"owned"));
    let manager = DatasetManager::with_defaults(catalog, IdentityStrategy::ecmwf());
    let outcome = manager
        .fetch_resources(&[resource("bad", "tar.gz")], &target, None)
        .unwrap();
    assert_eq!(outcome, FetchOutcome::Fetched(0));
    assert!(!temp.path().join("a").join("evil").exists());
}

#[test]
fn zip_resources_are_extracted() {
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("out");
    let catalog = MockCatalog::default();
    catalog.add_blob(
        "mock://inputs",
        common::zip_bytes(&[("rapid_connect.csv", b"1,0")]),
    );
    let manager = DatasetManager::with_defaults(catalog, IdentityStrategy::ecmwf());

    let outcome = manager
        .fetch_resources(&[resource("inputs", "ZIP")], &target, None)
        .unwrap();

    assert_eq!(outcome, FetchOutcome::Fetched(1));
    assert!(target.join("rapid_connect.csv").exists());
    let leftovers = fs::read_dir(&target).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[test]
fn unsupported_format_is_skipped_without_download() {
    let temp = tempfile::tempdir().unwrap();
    let manager = DatasetManager::with_defaults(MockCatalog::default(), IdentityStrategy::ecmwf());
    let outcome = manager
        .fetch_resources(&[resource("raw", "nc")], &temp.path().join("out"), None)
        .unwrap();
    assert_eq!(outcome, FetchOutcome::Fetched(0));
    assert_eq!(manager.catalog().count_calls("download"), 0);
}

#[test]
fn readiness_requires_full_warning_set() {
    let mut resources = members("20160711.12", 52);
    let ready = dataset("d", "erfp-nile-blue-20160711t12", resources.clone());
    assert_eq!(classify_readiness(&ready), Readiness::Ready);

    resources.extend(warning_points("20160711.12", &["2", "10"]));
    let partial = dataset("d", "erfp-nile-blue-20160711t12", resources.clone());
    assert_eq!(classify_readiness(&partial), Readiness::Incomplete);

    resources.extend(warning_points("20160711.12", &["20"]));
    let complete = dataset("d", "erfp-nile-blue-20160711t12", resources);
    assert_eq!(classify_readiness(&complete), Readiness::Ready);

    let short = dataset("d", "erfp-nile-blue-20160711t12", members("20160711.12", 51));
    assert_eq!(classify_readiness(&short), Readiness::Incomplete);
}

#[test]
fn recent_skips_incomplete_cycle() {
    let temp = tempfile::tempdir().unwrap();
    let complete = members("20160711.0", 52);
    let catalog = MockCatalog::with_datasets(vec![
        dataset("d12", "erfp-nile-blue-20160711t12", members("20160711.12", 10)),
        dataset("d00", "erfp-nile-blue-20160711t00", complete.clone()),
    ]);
    add_member_blobs(&catalog, &complete);
    let manager = DatasetManager::with_defaults(catalog, IdentityStrategy::ecmwf());

    let recent = manager
        .download_recent_ensemble(
            "Nile",
            "Blue",
            temp.path(),
            at("2016-07-11 15:00"),
            &PollPolicy::default(),
        )
        .unwrap()
        .unwrap();

    assert_eq!(recent.date_string, "20160711.0");
    assert_eq!(recent.outcome, FetchOutcome::Fetched(52));
    assert_eq!(recent.target_dir, temp.path().join("nile-blue").join("20160711.0"));
    assert!(recent.target_dir.join("Qout_nile_blue_52.nc").exists());
    assert_eq!(manager.catalog().count_calls("download"), 52);
}

#[test]
fn recent_accepts_stale_incomplete_cycle() {
    let temp = tempfile::tempdir().unwrap();
    let partial = members("20160710.12", 5);
    let catalog = MockCatalog::with_datasets(vec![dataset(
        "d",
        "erfp-nile-blue-20160710t12",
        partial.clone(),
    )]);
    add_member_blobs(&catalog, &partial);
    let manager = DatasetManager::with_defaults(catalog, IdentityStrategy::ecmwf());

    let recent = manager
        .download_recent_ensemble(
            "nile",
            "blue",
            temp.path(),
            at("2016-07-11 13:00"),
            &PollPolicy::default(),
        )
        .unwrap()
        .unwrap();

    assert_eq!(recent.date_string, "20160710.1200");
    assert_eq!(recent.outcome, FetchOutcome::Fetched(5));
}

#[test]
fn polling_is_bounded() {
    let temp = tempfile::tempdir().unwrap();
    let manager = DatasetManager::with_defaults(MockCatalog::default(), IdentityStrategy::ecmwf());
    let policy = PollPolicy {
        max_cycles: 3,
        spacing: TimeDelta::hours(12),
        stale_after: TimeDelta::hours(24),
    };

    let recent = manager
        .download_recent_ensemble("nile", "blue", temp.path(), at("2016-07-11 13:00"), &policy)
        .unwrap();

    assert!(recent.is_none());
    assert_eq!(manager.catalog().count_calls("search_datasets"), 3);
}

#[test]
fn missing_extract_directory_returns_none() {
    let temp = tempfile::tempdir().unwrap();
    let manager = DatasetManager::with_defaults(MockCatalog::default(), IdentityStrategy::ecmwf());
    let recent = manager
        .download_recent_ensemble(
            "nile",
            "blue",
            &temp.path().join("missing"),
            at("2016-07-11 13:00"),
            &PollPolicy::default(),
        )
        .unwrap();
    assert!(recent.is_none());
    assert!(manager.catalog().calls().is_empty());
}

#[test]
fn warning_points_are_named_by_return_period() {
    let temp = tempfile::tempdir().unwrap();
    let mut resources = members("20160711.12", 52);
    let warnings = warning_points("20160711.12", &["2", "10", "20"]);
    resources.extend(warnings.clone());
    let catalog = MockCatalog::with_datasets(vec![dataset(
        "d",
        "erfp-nile-blue-20160711t12",
        resources,
    )]);
    for warning in &warnings {
        let period = warning.name.rsplit('_').next().unwrap();
        let file = format!("return_{period}_points.geojson");
        catalog.add_blob(&warning.url, tar_gz(&[(file.as_str(), b"{}")]));
    }
    let manager = DatasetManager::with_defaults(catalog, IdentityStrategy::ecmwf());

    let download = manager
        .download_recent_warning_points("nile", "blue", temp.path(), at("2016-07-11 13:00"))
        .unwrap()
        .unwrap();

    assert_eq!(download.forecast_date, at("2016-07-11 12:00"));
    assert_eq!(download.files.len(), 3);
    for file in &download.files {
        assert!(file.exists(), "{}", file.display());
    }
    assert_eq!(manager.catalog().count_calls("download"), 3);
}

#[test]
fn wrf_recent_walks_back_hourly() {
    let temp = tempfile::tempdir().unwrap();
    let result = resource("wrfp-nile-blue-20150405T2200Z", "tar.gz");
    let catalog = MockCatalog::with_datasets(vec![dataset(
        "d",
        "wrfp-nile-blue-20150405",
        vec![result.clone()],
    )]);
    catalog.add_blob(
        &result.url,
        tar_gz(&[("RapidResult_20150405T2200Z_CF.nc", b"wrf")]),
    );
    let manager =
        DatasetManager::with_defaults(catalog, IdentityStrategy::wrf_hydro());

    let recent = manager
        .download_recent_wrf("nile", "blue", temp.path(), at("2015-04-05 23:40"))
        .unwrap()
        .unwrap();

    assert_eq!(recent.date_string, "20150405T2200Z");
    assert!(
        temp.path()
            .join("nile-blue")
            .join("RapidResult_20150405T2200Z_CF.nc")
            .exists()
    );
}

#[test]
fn missing_resource_is_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let manager = DatasetManager::with_defaults(MockCatalog::default(), IdentityStrategy::ecmwf());
    let outcome = manager
        .download_prediction_resource("nile", "blue", "20160711.1200", &temp.path().join("x"))
        .unwrap();
    assert_eq!(outcome, FetchOutcome::NotFound);
}

#[test]
fn failing_resource_does_not_stop_siblings() {
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("out");
    let catalog = MockCatalog::default();
    let good = resource("good", "tar.gz");
    catalog.add_blob(&good.url, tar_gz(&[("Qout_nile_blue_2.nc", b"q")]));
    let manager = DatasetManager::with_defaults(catalog, IdentityStrategy::ecmwf());

    let outcome = manager
        .fetch_resources(&[resource("missing-blob", "tar.gz"), good], &target, None)
        .unwrap();

    assert_eq!(outcome, FetchOutcome::Fetched(1));
    assert!(target.join("Qout_nile_blue_2.nc").exists());
    assert_eq!(manager.catalog().count_calls("download"), 2);
}
