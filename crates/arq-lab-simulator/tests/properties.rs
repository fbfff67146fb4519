use std::path::PathBuf;

use arq_lab_abstract::{TestScenario, WireEvent, scenario::pattern};
use arq_lab_simulator::{NodeId, Simulator, build_simulator, run_scenario, run_scenario_file};

fn scenario(src: &str) -> TestScenario {
    toml::from_str(src).unwrap()
}

fn scenario_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../scenarios")
        .join(name)
}

fn run(scenario: &TestScenario) -> Simulator {
    let mut sim = build_simulator(scenario).unwrap();
    sim.init();
    assert!(sim.run_until(300_000), "simulation did not settle");
    sim
}

fn count(sim: &Simulator, pred: impl Fn(&WireEvent) -> bool) -> usize {
    sim.events(NodeId::Sender).iter().filter(|(_, e)| pred(e)).count()
}

#[test]
fn bundled_scenarios_pass() {
    for name in ["ack_loss.toml", "gbn_segment_loss.toml", "lossy_channel.toml"] {
        if let Err(err) = run_scenario_file(&scenario_path(name)) {
            panic!("{name}: {err:#}");
        }
    }
}

#[test]
fn lost_ack_resends_only_the_unacknowledged_segment() {
    let sim = run(&scenario(
        r#"
        name = "ack loss"
        description = ""
        [config]
        min_latency = 10
        max_latency = 10
        [protocol]
        initial_seq = 100
        [[actions]]
        type = "drop_next_from_receiver_ack"
        ack = 1637
        "#,
    ));
    let lines = sim.event_lines(NodeId::Sender);
    let timeout = lines.iter().position(|l| l.starts_with("TIMEOUT")).unwrap();
    assert_eq!(lines[timeout], "TIMEOUT 1125");
    assert_eq!(lines[timeout + 1], "RESEND 1125 0");
    assert_eq!(count(&sim, WireEvent::is_resend), 1);
    assert_eq!(sim.delivered_data, pattern(5000));
}

#[test]
fn handshake_recovers_from_two_lost_syns() {
    let sim = run(&scenario(
        r#"
        name = "syn loss"
        description = ""
        [config]
        min_latency = 10
        max_latency = 10
        [protocol]
        initial_seq = 100
        [payload]
        type = "text"
        data = "hello"
        [[actions]]
        type = "drop_next_from_sender_seq"
        seq = 100
        [[actions]]
        type = "drop_next_from_sender_seq"
        seq = 100
        "#,
    ));
    let lines = sim.event_lines(NodeId::Sender);
    assert_eq!(
        lines[..5],
        [
            "SEND 100 0 SYN",
            "TIMEOUT 100",
            "RESEND 100 0 SYN",
            "TIMEOUT 100",
            "RESEND 100 0 SYN",
        ]
    );
    assert!(lines[5].starts_with("RECV ") && lines[5].ends_with(" 101 SYN ACK"));
    assert_eq!(count(&sim, WireEvent::is_timeout), 2);
    assert_eq!(count(&sim, WireEvent::is_resend), 2);
    assert_eq!(sim.delivered_data, b"hello");
}

#[test]
fn repeated_peer_fin_gets_dupack_and_linger_is_not_restarted() {
    let sim = run(&scenario(
        r#"
        name = "fin duplicate"
        description = ""
        [config]
        min_latency = 10
        max_latency = 10
        [payload]
        type = "pattern"
        size = 1000
        [[actions]]
        type = "duplicate_next_receiver_fin"
        "#,
    ));
    let sends: Vec<&(u64, WireEvent)> = sim
        .events(NodeId::Sender)
        .iter()
        .filter(|(_, e)| matches!(e, WireEvent::Send { resend: false, .. }))
        .collect();
    let [.., (final_at, final_ack), (_, dup_ack)] = sends.as_slice() else {
        panic!("too few sends: {sends:?}");
    };
    assert!(final_ack.to_string().ends_with(" ACK"), "{final_ack}");
    assert!(dup_ack.to_string().ends_with(" DUP-ACK"), "{dup_ack}");
    assert_eq!(sim.closed_at(NodeId::Sender), Some(final_at + 2000));
    assert!(sim.closed_at(NodeId::Receiver).is_some());
}

#[test]
fn random_impairments_preserve_the_stream() {
    for mode in ["sr", "gbn"] {
        for seed in 1..=6 {
            let report = run_scenario(&scenario(&format!(
                r#"
                name = "impairments"
                description = ""
                [config]
                loss_rate = 0.15
                corrupt_rate = 0.05
                duplicate_rate = 0.1
                min_latency = 5
                max_latency = 120
                seed = {seed}
                [protocol]
                mode = "{mode}"
                [payload]
                type = "pattern"
                size = 12000
                [[assertions]]
                type = "payload_delivered"
                [[assertions]]
                type = "max_in_flight"
                max = 10
                [[assertions]]
                type = "sender_closed"
                [[assertions]]
                type = "max_duration"
                ms = 300000
                "#
            )));
            if let Err(err) = report {
                panic!("mode {mode} seed {seed}: {err:#}");
            }
        }
    }
}

#[test]
fn sequence_numbers_wrap_around_the_modulus() {
    for mode in ["sr", "gbn"] {
        let sim = run(&scenario(&format!(
            r#"
            name = "wrap"
            description = ""
            [config]
            loss_rate = 0.1
            seed = 3
            [protocol]
            mode = "{mode}"
            initial_seq = 25000
            [payload]
            type = "pattern"
            size = 6000
            "#
        )));
        assert_eq!(sim.delivered_data, pattern(6000), "mode {mode}");
        let wrapped = sim.events(NodeId::Sender).iter().any(|(_, e)| {
            matches!(e, WireEvent::Send { header, .. } if !header.is_syn() && header.seq_num.raw() < 25000)
        });
        assert!(wrapped, "mode {mode}: no segment below the ISN");
        assert!(sim.closed_at(NodeId::Sender).is_some());
    }
}

#[test]
fn empty_source_still_completes_handshake_and_close() {
    let sim = run(&scenario(
        r#"
        name = "empty"
        description = ""
        [protocol]
        initial_seq = 7
        [payload]
        type = "pattern"
        size = 0
        "#,
    ));
    let lines = sim.event_lines(NodeId::Sender);
    assert_eq!(lines[0], "SEND 7 0 SYN");
    assert!(lines[2].starts_with("SEND 8 ") && lines[2].ends_with(" ACK"));
    assert!(lines.iter().any(|l| l == "SEND 8 0 FIN"));
    assert!(sim.delivered_data.is_empty());
    assert!(sim.closed_at(NodeId::Sender).is_some());
}

#[test]
fn report_serialises_to_json() {
    let report = run_scenario_file(&scenario_path("ack_loss.toml")).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["delivered_bytes"], 5000);
    assert_eq!(json["sender_events"][0]["event"], "SEND 100 0 SYN");
    assert!(json["sender_closed_at"].is_u64());
}

#[test]
fn go_back_n_sender_works_with_selective_receiver() {
    let sim = run(&scenario(
        r#"
        name = "gbn vs selective"
        description = ""
        receiver_ack_mode = "selective"
        [config]
        min_latency = 10
        max_latency = 10
        [protocol]
        mode = "gbn"
        initial_seq = 100
        [[actions]]
        type = "drop_next_from_sender_seq"
        seq = 613
        "#,
    ));
    let lines = sim.event_lines(NodeId::Sender);
    let timeout = lines.iter().position(|l| l.starts_with("TIMEOUT")).unwrap();
    assert_eq!(lines[timeout], "TIMEOUT 613");
    // Go-back-N resends the whole window, not only the lost segment.
    assert_eq!(lines[timeout + 1], "RESEND 613 0");
    assert!(count(&sim, WireEvent::is_resend) > 1);
    assert_eq!(count(&sim, WireEvent::is_timeout), 1);
    assert_eq!(sim.delivered_data, pattern(5000));
    assert!(sim.closed_at(NodeId::Sender).is_some());
}

#[test]
fn selective_repeat_sender_works_with_cumulative_receiver() {
    let sim = run(&scenario(
        r#"
        name = "sr vs cumulative"
        description = ""
        receiver_ack_mode = "cumulative"
        [config]
        min_latency = 10
        max_latency = 10
        [protocol]
        mode = "sr"
        initial_seq = 100
        [[actions]]
        type = "drop_next_from_receiver_ack"
        ack = 613
        "#,
    ));
    // The next cumulative ack covers the lost one, so nothing times out.
    assert_eq!(count(&sim, WireEvent::is_timeout), 0);
    assert_eq!(sim.delivered_data, pattern(5000));
    assert!(sim.closed_at(NodeId::Sender).is_some());
}
