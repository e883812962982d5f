//! Tests for the bucket store

use super::*;
use crate::models::{ClusterEngine, ResourceUsage};
use chrono::{Duration, TimeZone};

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

fn cluster_scope() -> ScopeKey {
    ScopeKey::cluster("proj", "cls-1", ClusterEngine::K8s)
}

fn cluster_sample(time: DateTime<Utc>, nodes: f64) -> ClusterMetrics {
    let mut sample = ClusterMetrics {
        time,
        cpu: ResourceUsage {
            request: 4.0,
            used: nodes,
            total: 16.0,
        },
        memory: ResourceUsage::default(),
        instance_count: nodes * 3.0,
        node_count: nodes,
        available_node_count: nodes as u64,
        ca_scale_up: 0,
        ca_scale_down: 0,
        workload_count: 0,
        extrema: Default::default(),
    };
    let extrema = sample.point_extrema("cls-1", &Dimension::Minute.period_label(time));
    sample.set_extrema(extrema);
    sample
}

fn workload_sample(time: DateTime<Utc>) -> WorkloadMetrics {
    let mut sample = WorkloadMetrics {
        time,
        cpu: ResourceUsage::default(),
        memory: ResourceUsage::default(),
        instance_count: 1.0,
        extrema: Default::default(),
    };
    let extrema = sample.point_extrema("w", "p");
    sample.set_extrema(extrema);
    sample
}

fn minute_opts(scope: ScopeKey, time: DateTime<Utc>) -> JobCommonOpts {
    JobCommonOpts::new(scope, Dimension::Minute, time)
}

#[tokio::test]
async fn test_first_insert_seeds_extrema_from_sample() {
    let table = MemoryBucketTable::<ClusterMetrics>::new();
    let sample = cluster_sample(at(10, 5), 10.0);

    table
        .insert(sample.clone(), &minute_opts(cluster_scope(), at(10, 5)))
        .await
        .unwrap();

    let buckets = table
        .get_raw(&minute_opts(cluster_scope(), at(10, 5)), "")
        .await
        .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].key.bucket_time, "2024-03-01T10");
    assert_eq!(buckets[0].extrema, sample.extrema);
    assert_eq!(buckets[0].metrics, vec![sample]);
}

#[tokio::test]
async fn test_extrema_widening_is_order_independent() {
    let values = [10.0, 12.0, 8.0, 11.0];
    let forward = MemoryBucketTable::<ClusterMetrics>::new();
    let backward = MemoryBucketTable::<ClusterMetrics>::new();

    for (i, value) in values.iter().enumerate() {
        let time = at(10, i as u32);
        forward
            .insert(cluster_sample(time, *value), &minute_opts(cluster_scope(), time))
            .await
            .unwrap();
    }
    for (i, value) in values.iter().enumerate().rev() {
        let time = at(10, i as u32);
        backward
            .insert(cluster_sample(time, *value), &minute_opts(cluster_scope(), time))
            .await
            .unwrap();
    }

    let opts = minute_opts(cluster_scope(), at(10, 0));
    let forward = &forward.get_raw(&opts, "").await.unwrap()[0];
    let backward = &backward.get_raw(&opts, "").await.unwrap()[0];

    assert_eq!(forward.extrema.node.max.value, 12.0);
    assert_eq!(forward.extrema.node.min.value, 8.0);
    assert_eq!(forward.extrema.node.max.period, "2024-03-01 10:01");
    assert_eq!(forward.extrema, backward.extrema);
    assert_eq!(forward.metrics.len(), 4);
}

#[tokio::test]
async fn test_samples_split_by_bucket_time() {
    let table = MemoryBucketTable::<ClusterMetrics>::new();
    for time in [at(10, 58), at(10, 59), at(11, 0)] {
        table
            .insert(cluster_sample(time, 5.0), &minute_opts(cluster_scope(), time))
            .await
            .unwrap();
    }

    let opts = minute_opts(cluster_scope(), at(11, 0));
    assert_eq!(table.get_raw(&opts, "").await.unwrap().len(), 2);
    assert_eq!(table.get_raw(&opts, "2024-03-01T10").await.unwrap()[0].metrics.len(), 2);
    assert!(table.get_raw(&opts, "2024-03-01T12").await.unwrap().is_empty());
    assert!(table
        .get_raw(&opts.with_dimension(Dimension::Hour), "")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_concurrent_writers_keep_every_sample() {
    let table = Arc::new(MemoryBucketTable::<ClusterMetrics>::new());
    let mut handles = Vec::new();

    for i in 0..16u32 {
        let table = table.clone();
        handles.push(tokio::spawn(async move {
            let time = at(10, i);
            table
                .insert(cluster_sample(time, i as f64), &minute_opts(cluster_scope(), time))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let bucket = &table
        .get_raw(&minute_opts(cluster_scope(), at(10, 0)), "")
        .await
        .unwrap()[0];
    assert_eq!(bucket.metrics.len(), 16);
    assert_eq!(bucket.extrema.node.max.value, 15.0);
    assert_eq!(bucket.extrema.node.min.value, 0.0);
}

#[tokio::test]
async fn test_workload_count_only_counts_window() {
    let stores = Stores::in_memory();
    let namespace = cluster_scope().namespace("default");
    let after = at(10, 30);

    // 3 workloads seen inside the window
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        let time = after + Duration::minutes(i as i64);
        let scope = namespace.workload("Deployment", *name);
        stores
            .workload
            .insert(workload_sample(time), &minute_opts(scope, time))
            .await
            .unwrap();
    }
    // 2 workloads last seen before it
    for name in ["old-1", "old-2"] {
        let time = after - Duration::minutes(10);
        let scope = namespace.workload("Deployment", name);
        stores
            .workload
            .insert(workload_sample(time), &minute_opts(scope, time))
            .await
            .unwrap();
    }
    // another namespace does not count under this filter
    let other = cluster_scope().namespace("kube-system").workload("DaemonSet", "dns");
    stores
        .workload
        .insert(workload_sample(after), &minute_opts(other, after))
        .await
        .unwrap();

    assert_eq!(stores.workload_count(&namespace, after).await.unwrap(), 3);
    assert_eq!(stores.workload_count(&cluster_scope(), after).await.unwrap(), 4);
}

#[tokio::test]
async fn test_workload_count_counts_bucket_records() {
    let stores = Stores::in_memory();
    let scope = cluster_scope().namespace("default").workload("Deployment", "web");

    // 10:59 and 11:00 land in two minute buckets
    for time in [at(10, 59), at(11, 0)] {
        stores
            .workload
            .insert(workload_sample(time), &minute_opts(scope.clone(), time))
            .await
            .unwrap();
    }

    assert_eq!(stores.workload_count(&cluster_scope(), at(10, 58)).await.unwrap(), 2);
    assert_eq!(stores.workload_count(&cluster_scope(), at(11, 0)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_query_info_filters_and_sorts() {
    let table = MemoryBucketTable::<ClusterMetrics>::new();
    for time in [at(11, 2), at(10, 50), at(11, 1), at(9, 0)] {
        table
            .insert(cluster_sample(time, 3.0), &minute_opts(cluster_scope(), time))
            .await
            .unwrap();
    }

    let view = table
        .query_info(&cluster_scope(), Dimension::Minute, at(10, 0))
        .await
        .unwrap();
    let times: Vec<_> = view.metrics.iter().map(|m| m.time).collect();
    assert_eq!(times, vec![at(10, 50), at(11, 1), at(11, 2)]);
    assert_eq!(view.start_time, Some(at(10, 50)));
    assert_eq!(view.end_time, Some(at(11, 2)));

    let empty = table
        .query_info(&cluster_scope(), Dimension::Day, at(10, 0))
        .await
        .unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.start_time, None);
}

#[tokio::test]
async fn test_list_info_pages_by_scope() {
    let table = MemoryBucketTable::<ClusterMetrics>::new();
    for id in ["c1", "c2", "c3"] {
        let scope = ScopeKey::cluster("proj", id, ClusterEngine::K8s);
        table
            .insert(cluster_sample(at(10, 0), 1.0), &minute_opts(scope, at(10, 0)))
            .await
            .unwrap();
    }
    let foreign = ScopeKey::cluster("other", "c9", ClusterEngine::Mesos);
    table
        .insert(cluster_sample(at(10, 0), 1.0), &minute_opts(foreign, at(10, 0)))
        .await
        .unwrap();

    let filter = ScopeKey::project("proj").as_kind(ObjectKind::Cluster);
    let page = table
        .list_info(&filter, Dimension::Minute, at(9, 0), Page::new(2, 2))
        .await
        .unwrap();

    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].scope.cluster_id, "c3");
}

#[tokio::test]
async fn test_flush_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cluster.json");

    let table = MemoryBucketTable::<ClusterMetrics>::open(&path).unwrap();
    table
        .insert(cluster_sample(at(10, 0), 7.0), &minute_opts(cluster_scope(), at(10, 0)))
        .await
        .unwrap();
    table.flush().await.unwrap();
    assert!(path.exists());

    let reopened = MemoryBucketTable::<ClusterMetrics>::open(&path).unwrap();
    assert_eq!(reopened.len(), 1);
    let bucket = &reopened
        .get_raw(&minute_opts(cluster_scope(), at(10, 0)), "2024-03-01T10")
        .await
        .unwrap()[0];
    assert_eq!(bucket.extrema.node.max.value, 7.0);
}

#[tokio::test]
async fn test_stores_open_creates_snapshots_on_flush() {
    let dir = tempfile::tempdir().unwrap();
    let stores = Stores::open(dir.path()).unwrap();

    stores
        .cluster
        .insert(cluster_sample(at(10, 0), 2.0), &minute_opts(cluster_scope(), at(10, 0)))
        .await
        .unwrap();
    stores.flush().await.unwrap();

    assert!(dir.path().join("cluster.json").exists());
    // untouched tables are not written
    assert!(!dir.path().join("project.json").exists());
}
