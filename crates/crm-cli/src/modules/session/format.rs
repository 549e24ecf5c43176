use crm_core::SessionRecord;

pub(crate) fn print_session(session: &SessionRecord) {
    println!("session:       {}", session.session_id);
    println!("device:        {}", session.device_id);
    if let Some(name) = session.device_name.as_deref() {
        println!("device name:   {name}");
    }
    println!("client:        {}", session.client_type);
    println!("status:        {}", session.status.as_str());
    println!("created:       {}", session.created_at.to_rfc3339());
    println!("last activity: {}", session.last_activity_at.to_rfc3339());
    println!("expires:       {}", session.expires_at.to_rfc3339());
}

/// `current` marks the row of the session this device holds, if any.
pub(crate) fn print_session_table(sessions: &[SessionRecord], current: Option<&str>) {
    let mut id_width = "SESSION".len();
    let mut device_width = "DEVICE".len();
    for session in sessions {
        id_width = id_width.max(session.session_id.len());
        let device = session.device_name.as_deref().unwrap_or(&session.device_id);
        device_width = device_width.max(device.len());
    }

    println!(
        "  {:<id_width$}  {:<device_width$}  {:<9}  {:<10}  LAST ACTIVITY",
        "SESSION", "DEVICE", "CLIENT", "STATUS"
    );
    for session in sessions {
        let marker = if current == Some(session.session_id.as_str()) {
            "*"
        } else {
            " "
        };
        let device = session.device_name.as_deref().unwrap_or(&session.device_id);
        println!(
            "{marker} {:<id_width$}  {:<device_width$}  {:<9}  {:<10}  {}",
            session.session_id,
            device,
            session.client_type.to_string(),
            session.status.as_str(),
            session.last_activity_at.format("%Y-%m-%d %H:%M"),
        );
    }
}
