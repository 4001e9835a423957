mod common;

use anyhow::Result;
use common::{Household, add_shared, test_service};
use splitledger::application::ExpenseData;
use splitledger::domain::SettlementFilter;
use splitledger::io::Exporter;

#[tokio::test]
async fn test_export_settlements_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    let space = home.trip(&service).await?;
    add_shared(&service, &home, &space, &home.alice, 30000, "Dinner").await?;
    service.confirm_group(home.alice.id, space.id, None).await?;

    let mut out = Vec::new();
    let count = Exporter::new(&service, home.bob.id)
        .export_settlements_csv(&mut out, &SettlementFilter::default())
        .await?;
    assert_eq!(count, 1);

    let csv = String::from_utf8(out)?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("id,group,debtor,creditor,amount"));
    assert!(lines[1].contains(",Trip,Bob,Alice,100.00,false,false,"));
    Ok(())
}

#[tokio::test]
async fn test_export_full_json() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let home = Household::create(&service).await?;
    service
        .record_expense(home.carol.id, ExpenseData::new(1999).with_note("Books"))
        .await?;

    let mut out = Vec::new();
    let snapshot = Exporter::new(&service, home.carol.id)
        .export_full_json(&mut out)
        .await?;
    assert_eq!(snapshot.wallets.len(), 1);
    assert_eq!(snapshot.transactions.len(), 1);

    let json: serde_json::Value = serde_json::from_slice(&out)?;
    assert_eq!(json["user"]["name"], "Carol");
    assert_eq!(json["transactions"][0]["amount_cents"], 1999);
    assert_eq!(json["transactions"][0]["note"], "Books");
    Ok(())
}
