use fin_jobs::QueueService;

/// Shared state for dashboard handlers
#[derive(Clone)]
pub struct DashboardState {
    pub service: QueueService,
}

impl DashboardState {
    pub fn new(service: QueueService) -> Self {
        Self { service }
    }
}
