use anyhow::Result;
use beacon_protocol::NotificationRecord;
use beacon_protocol::PageInfo;

/// One line per record: unread marker, id, time, priority, category, title.
pub fn render_record(record: &NotificationRecord) -> String {
    let marker = if record.read { ' ' } else { '*' };
    format!(
        "{marker} {id}  {created}  [{priority}] {category}: {title}",
        id = record.id,
        created = record.created_at.format("%Y-%m-%d %H:%M"),
        priority = record.priority,
        category = record.category,
        title = record.title,
    )
}

pub(crate) fn print_records(
    records: &[NotificationRecord],
    page: Option<PageInfo>,
    json: bool,
) -> Result<()> {
    if json {
        let value = match page {
            Some(page) => serde_json::json!({ "page": page, "notifications": records }),
            None => serde_json::to_value(records)?,
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No notifications");
    }
    for record in records {
        println!("{}", render_record(record));
    }
    if let Some(page) = page {
        println!(
            "page {} of {} ({} total)",
            page.number + 1,
            page.total_pages.max(1),
            page.total_elements
        );
    }
    Ok(())
}
