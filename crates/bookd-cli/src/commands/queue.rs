//! `bookd queue` — read-only queue-order/active listing plus priority edits.

use anyhow::Result;
use serde_json::json;

use crate::http_client::ApiClient;

pub fn order(client: &ApiClient) -> Result<()> {
    let value = client.get("/queue/order")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub fn active(client: &ApiClient) -> Result<()> {
    let value = client.get("/downloads/active")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub fn clear(client: &ApiClient) -> Result<()> {
    let value = client.delete("/queue/clear")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub fn set_priority(client: &ApiClient, id: &str, priority: i64) -> Result<()> {
    let value = client.put_json(&format!("/queue/{id}/priority"), &json!({ "priority": priority }))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
