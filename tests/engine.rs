use color_eyre::Result;
use pretty_assertions::assert_eq;
use smart_response::{
    error::Error,
    log_store::LogKind,
    rule::{ConditionKind, RuleId, RuleStatus},
    transport::TransportKind,
};

#[macro_use]
mod common;
use common::*;

#[tokio::test(start_paused = true)]
async fn disabled_engine_only_logs_and_counts() -> Result<()> {
    let bench = Bench::new(false).await?;
    let mut wire = bench.wire(TransportKind::Serial);
    bench.console.add_rule(handshake_rule(0)).await?;
    bench.console.clear_logs().await?;

    let outcome = bench
        .console
        .receive(TransportKind::Serial, vec![0xAA, 0x55])
        .await?;
    assert!(!outcome.evaluated);
    assert!(outcome.matched.is_empty());

    wait_ms(100).await;

    assert_eq!(
        bench.contents().await?,
        vec![(LogKind::Rx, "AA 55".to_owned())]
    );
    assert!(written(&mut wire).is_empty());
    assert_eq!(bench.console.counters(TransportKind::Serial).await?.rx, 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn paused_rules_never_fire() -> Result<()> {
    let bench = Bench::new(true).await?;
    let rule = handshake_rule(0);
    bench.console.add_rule(rule.clone()).await?;
    assert_eq!(
        bench.console.toggle_rule(rule.id).await?,
        RuleStatus::Paused
    );

    let outcome = bench
        .console
        .receive(TransportKind::Serial, vec![0xAA, 0x55])
        .await?;
    assert!(outcome.evaluated);
    assert!(outcome.matched.is_empty());

    wait_ms(100).await;
    assert_no_entries!(bench, LogKind::Tx);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn disabling_engine_cancels_everything() -> Result<()> {
    let bench = Bench::new(true).await?;
    bench.console.add_rule(handshake_rule(100)).await?;

    for kind in [TransportKind::Serial, TransportKind::Ble, TransportKind::Http] {
        bench.console.receive(kind, vec![0xAA, 0x55]).await?;
    }
    assert_eq!(bench.console.pending_responses().await?, 3);

    wait_ms(50).await;
    bench.console.set_engine_enabled(false).await?;
    assert_eq!(bench.console.pending_responses().await?, 0);

    // Turning it back on does not resurrect anything.
    bench.console.set_engine_enabled(true).await?;

    wait_ms(200).await;
    assert_no_entries!(bench, LogKind::Tx);

    Ok(())
}

#[tokio::test]
async fn rules_can_be_paused_but_not_resumed_while_stopped() -> Result<()> {
    let bench = Bench::new(false).await?;
    let rule = handshake_rule(0);
    bench.console.add_rule(rule.clone()).await?;

    assert_eq!(
        bench.console.toggle_rule(rule.id.clone()).await?,
        RuleStatus::Paused
    );
    assert_eq!(
        bench.console.toggle_rule(rule.id.clone()).await,
        Err(Error::EngineDisabled(rule.id.clone()))
    );

    let active = bench.console.active_rules().await?;
    assert_eq!(active[0].status, RuleStatus::Paused);

    bench.console.set_engine_enabled(true).await?;
    assert_eq!(
        bench.console.toggle_rule(rule.id).await?,
        RuleStatus::Active
    );

    Ok(())
}

#[tokio::test]
async fn rules_cannot_be_resumed_by_editing_while_stopped() -> Result<()> {
    let bench = Bench::new(false).await?;
    let rule = handshake_rule(0);
    bench.console.add_rule(rule.clone()).await?;
    bench.console.toggle_rule(rule.id.clone()).await?;

    assert_eq!(
        bench.console.update_rule(rule.clone()).await,
        Err(Error::EngineDisabled(rule.id.clone()))
    );
    assert_eq!(
        bench.console.active_rules().await?[0].status,
        RuleStatus::Paused
    );

    bench.console.set_engine_enabled(true).await?;
    bench.console.update_rule(rule).await?;
    assert_eq!(
        bench.console.active_rules().await?[0].status,
        RuleStatus::Active
    );

    Ok(())
}

#[tokio::test]
async fn toggling_unknown_rule() -> Result<()> {
    let bench = Bench::new(true).await?;

    assert_eq!(
        bench.console.toggle_rule(RuleId::new("ghost")).await,
        Err(Error::NoSuchRule(RuleId::new("ghost")))
    );

    Ok(())
}

#[tokio::test]
async fn malformed_regex_is_reported_once() -> Result<()> {
    let bench = Bench::new(true).await?;
    bench
        .console
        .add_rule(log_rule("bad", ConditionKind::Regex, "(oops", "never"))
        .await?;

    for _ in 0..5 {
        let outcome = bench.console.receive(TransportKind::Ble, "(oops").await?;
        assert!(outcome.matched.is_empty());
    }

    let errors = bench.entries(LogKind::Err).await?;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].content.contains("bad"));
    assert_eq!(bench.console.stats().await?.total_errors, 1);

    Ok(())
}

#[tokio::test]
async fn receive_on_stopped_transport_is_rejected() -> Result<()> {
    let bench = Bench::new(true).await?;
    bench.transport(TransportKind::Http).stop();

    assert_eq!(
        bench.console.receive(TransportKind::Http, "hello").await,
        Err(Error::NotConnected(TransportKind::Http))
    );
    assert!(bench.console.logs().await?.is_empty());
    assert_eq!(bench.console.counters(TransportKind::Http).await?.rx, 0);

    Ok(())
}
