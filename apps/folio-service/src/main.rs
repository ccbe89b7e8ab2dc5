//! # folio-admin
//!
//! Staff CLI for payment review.
//!
//! ## Usage
//! ```bash
//! folio-admin pending [--page N] [--per-page N]
//! folio-admin approve <ORDER_ID> [--ref REFERENCE] --staff <ID>
//! folio-admin approve-bundle <BUNDLE_ID> [--ref REFERENCE] --staff <ID>
//! folio-admin reject <ORDER_ID> --reason <TEXT> --staff <ID>
//! folio-admin refund <ORDER_ID> --staff <ID>
//! folio-admin purchases [--user U] [--item I] [--bundle B] [--status S]... [--page N]
//! folio-admin qr <ORDER_ID>
//! ```
//!
//! Configuration comes from the same `FOLIO_*` variables as the service.
//! `FOLIO_STAFF_ID` stands in for `--staff`.

use anyhow::{anyhow, bail, Context};
use std::env;

use folio_core::{Order, OrderFilter, OrderStatus, Page};
use folio_service::config::ServiceConfig;
use folio_service::error::ServiceError;
use folio_service::{init_tracing, qr, Services};

/// Parsed command line.
#[derive(Debug, Default)]
struct Args {
    command: String,
    target: Option<String>,
    staff: Option<String>,
    reference: Option<String>,
    reason: Option<String>,
    page: u32,
    per_page: u32,
    filter: OrderFilter,
}

fn parse_args(raw: &[String]) -> anyhow::Result<Args> {
    let mut args = Args {
        page: 1,
        per_page: 20,
        staff: env::var("FOLIO_STAFF_ID").ok(),
        ..Args::default()
    };

    let mut i = 1;
    while i < raw.len() {
        let flag = raw[i].as_str();
        let value = || raw.get(i + 1).cloned().ok_or_else(|| anyhow!("{flag} needs a value"));

        match flag {
            "--staff" | "-s" => args.staff = Some(value()?),
            "--ref" | "-r" => args.reference = Some(value()?),
            "--reason" => args.reason = Some(value()?),
            "--page" | "-p" => args.page = value()?.parse().context("--page must be a number")?,
            "--per-page" => args.per_page = value()?.parse().context("--per-page must be a number")?,
            "--user" => args.filter.user_id = Some(value()?),
            "--item" => args.filter.item_id = Some(value()?),
            "--bundle" => args.filter.bundle_id = Some(value()?),
            "--status" => {
                let status: OrderStatus = value()?.parse().map_err(|e: String| anyhow!(e))?;
                args.filter.statuses.push(status);
            }
            "--help" | "-h" => {
                args.command = "help".to_string();
                return Ok(args);
            }
            other if other.starts_with('-') => bail!("Unknown option: {other}"),
            positional => {
                if args.command.is_empty() {
                    args.command = positional.to_string();
                } else if args.target.is_none() {
                    args.target = Some(positional.to_string());
                } else {
                    bail!("Unexpected argument: {positional}");
                }
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    Ok(args)
}

fn print_help() {
    println!("Folio payment review");
    println!();
    println!("Usage: folio-admin <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  pending                     List orders waiting for review");
    println!("  approve <ORDER_ID>          Confirm a transfer");
    println!("  approve-bundle <BUNDLE_ID>  Confirm one transfer for a whole bundle");
    println!("  reject <ORDER_ID>           Reject an order (needs --reason)");
    println!("  refund <ORDER_ID>           Refund a paid order");
    println!("  purchases                   Search orders");
    println!("  qr <ORDER_ID>               Show the order's payment QR");
    println!();
    println!("Options:");
    println!("  -s, --staff <ID>     Reviewer id (default: $FOLIO_STAFF_ID)");
    println!("  -r, --ref <REF>      Bank reference recorded on approval");
    println!("      --reason <TEXT>  Rejection reason");
    println!("  -p, --page <N>       Page number (default: 1)");
    println!("      --per-page <N>   Page size (default: 20)");
    println!("      --user/--item/--bundle/--status  purchases filters");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let raw: Vec<String> = env::args().collect();
    let args = parse_args(&raw)?;

    if args.command.is_empty() || args.command == "help" {
        print_help();
        return Ok(());
    }

    let config = ServiceConfig::load()?;
    let services = Services::connect(config)
        .await
        .context("Could not open the Folio database")?;

    let result = run(&services, &args).await;
    services.close().await;
    result
}

async fn run(services: &Services, args: &Args) -> anyhow::Result<()> {
    let admin = services.admin();
    let fail = |err: ServiceError| anyhow!(services.api_error(&err));

    match args.command.as_str() {
        "pending" => {
            let page = admin.pending(args.page, args.per_page).await.map_err(fail)?;
            print_page(&page);
        }
        "approve" => {
            let order = admin
                .approve(order_id(args)?, staff(args)?, args.reference.as_deref())
                .await
                .map_err(fail)?;
            println!("✓ Order {} marked paid ({})", order.id, order.final_amount());
        }
        "approve-bundle" => {
            let bundle_id = args.target.as_deref().context("approve-bundle needs a BUNDLE_ID")?;
            let orders = admin
                .approve_bundle(bundle_id, staff(args)?, args.reference.as_deref())
                .await
                .map_err(fail)?;
            println!("✓ Bundle {} marked paid ({} orders)", bundle_id, orders.len());
        }
        "reject" => {
            let reason = args.reason.as_deref().context("reject needs --reason")?;
            let order = admin.reject(order_id(args)?, staff(args)?, reason).await.map_err(fail)?;
            println!("✓ Order {} rejected", order.id);
        }
        "refund" => {
            let order = admin.refund(order_id(args)?, staff(args)?).await.map_err(fail)?;
            println!("✓ Order {} refunded", order.id);
        }
        "purchases" => {
            let page = admin
                .purchases(&args.filter, args.page, args.per_page)
                .await
                .map_err(fail)?;
            print_page(&page);
        }
        "qr" => {
            let order = services.db().orders().get(order_id(args)?).await?;
            let payload = order
                .payment_payload
                .as_deref()
                .context("No payment has been requested for this order yet")?;

            println!("{}", qr::terminal(payload)?);
            println!("Order {} · {} · {}", order.id, order.final_amount(), order.status);
        }
        other => bail!("Unknown command: {other} (try --help)"),
    }

    Ok(())
}

fn order_id(args: &Args) -> anyhow::Result<i64> {
    args.target
        .as_deref()
        .context("missing ORDER_ID")?
        .parse()
        .context("ORDER_ID must be a number")
}

fn staff(args: &Args) -> anyhow::Result<&str> {
    args.staff
        .as_deref()
        .context("missing --staff (or FOLIO_STAFF_ID)")
}

fn print_page(page: &Page<Order>) {
    println!("{:>8}  {:<10}  {:<20}  {:<20}  {:>12}  {}", "ORDER", "STATUS", "USER", "ITEM", "AMOUNT", "BUNDLE");
    for order in &page.items {
        println!(
            "{:>8}  {:<10}  {:<20}  {:<20}  {:>12}  {}",
            order.id,
            order.status.as_str(),
            order.user_id,
            order.item_id,
            order.final_amount().to_string(),
            order.bundle_id.as_deref().unwrap_or("-"),
        );
    }
    println!();
    println!("Page {} of {} ({} orders)", page.page, page.total_pages().max(1), page.total);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("folio-admin").chain(args.iter().copied()).map(String::from).collect()
    }

    #[test]
    fn test_parse_approve() {
        let args = parse_args(&argv(&["approve", "42", "--ref", "REF1", "--staff", "staff-1"])).unwrap();
        assert_eq!(args.command, "approve");
        assert_eq!(order_id(&args).unwrap(), 42);
        assert_eq!(args.reference.as_deref(), Some("REF1"));
        assert_eq!(staff(&args).unwrap(), "staff-1");
    }

    #[test]
    fn test_parse_purchase_filters() {
        let args = parse_args(&argv(&["purchases", "--status", "paid", "--status", "refunded", "--page", "3"])).unwrap();
        assert_eq!(args.filter.statuses, vec![OrderStatus::Paid, OrderStatus::Refunded]);
        assert_eq!(args.page, 3);
        assert_eq!(args.per_page, 20);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&argv(&["approve", "1", "--ref"])).is_err());
        assert!(parse_args(&argv(&["purchases", "--status", "lost"])).is_err());
        assert!(parse_args(&argv(&["approve", "1", "2"])).is_err());
        assert!(order_id(&parse_args(&argv(&["approve", "abc"])).unwrap()).is_err());
    }
}
