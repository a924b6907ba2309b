use std::collections::HashSet;
use std::time::Duration;

use ringcom::launcher::launch;
use ringcom::settings::Settings;
use ringcom::ComConfig;

fn settings(process_count: usize) -> Settings {
    Settings {
        process_count,
        running_time: Duration::from_secs(3),
        name_prefix: "P".to_string(),
        com: ComConfig::fast(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_processes_play_the_script() {
    let reports = launch(settings(3)).await.unwrap();
    assert_eq!(reports.len(), 3);

    let ranks: HashSet<usize> = reports
        .iter()
        .map(|report| report.rank.expect("every process is named").value())
        .collect();
    assert_eq!(ranks, (0..3).collect());

    for report in &reports {
        assert!(report.finished, "{} did not finish: {:?}", report.name, report.error);
        assert_eq!(report.error, None);
        assert_eq!(report.group_size, 3);
    }

    // exactly one process finds an empty inbox in the critical section
    let winners: Vec<_> = reports
        .iter()
        .filter(|report| report.won_race == Some(true))
        .collect();
    assert_eq!(winners.len(), 1);
    let announcement = format!("{} won!", winners[0].name);
    for report in reports.iter().filter(|report| report.won_race == Some(false)) {
        assert_eq!(report.received.last(), Some(&announcement));
    }

    assert!(reports[0].received.contains(&"OK".to_string()));
    assert!(reports[1].received[0].starts_with("calling P2 first"));
    assert!(reports[2].received[0].starts_with("left P1 a message"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_process_wins_alone() {
    let reports = launch(settings(1)).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].finished);
    assert_eq!(reports[0].won_race, Some(true));
    assert!(reports[0].received.is_empty());
}

#[tokio::test]
async fn test_invalid_settings_are_rejected() {
    assert!(launch(settings(0)).await.is_err());
}
