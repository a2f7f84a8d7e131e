use uuid::Uuid;

/// Generate a unique request (correlation) identifier using UUID v4
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate an identifier for a newly connected tunnel agent
pub fn generate_agent_id() -> String {
    format!("agent_{}", Uuid::new_v4().simple())
}
