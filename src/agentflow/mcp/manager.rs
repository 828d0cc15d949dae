//! Pool of MCP clients and their registry lifecycle.
//!
//! The manager owns every [`McpClient`] in the process, registers each
//! server's tools in the shared registry under `"<server_id>:<tool>"`
//! names, and is the only writer for those entries. On worker start a
//! reconnect sweep walks the persisted server set; individual failures are
//! recorded on the instance and never block startup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::agentflow::storage::McpServerRepository;
use crate::agentflow::tool_protocol::{SharedToolRegistry, Tool};

use super::{McpClient, McpServerConfig, McpServerInstance, McpToolAdapter, McpToolInfo, ServerStatus};

/// Manages MCP server connections and tool registration.
pub struct McpManager {
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
    servers: RwLock<HashMap<String, McpServerInstance>>,
    registry: SharedToolRegistry,
}

impl McpManager {
    pub fn new(registry: SharedToolRegistry) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            servers: RwLock::new(HashMap::new()),
            registry,
        }
    }

    pub async fn server_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Ids of servers whose connection is currently active.
    pub async fn connected_servers(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        let mut connected = Vec::new();
        for (id, client) in clients.iter() {
            if client.is_connected().await {
                connected.push(id.clone());
            }
        }
        connected.sort();
        connected
    }

    /// Connect to a server and (optionally) register its tools.
    ///
    /// Failure does not return an error: the instance comes back with
    /// status [`ServerStatus::Error`] and the message, so callers can
    /// persist the outcome either way.
    pub async fn add_server(
        &self,
        config: McpServerConfig,
        register_tools: bool,
    ) -> McpServerInstance {
        let server_id = config.id.clone();
        let mut instance = McpServerInstance {
            id: server_id.clone(),
            user_id: String::new(),
            name: config.name.clone(),
            template: config.template.clone(),
            url: config.url.clone(),
            status: ServerStatus::Disconnected,
            secret_ref: String::new(),
            oauth_token_ref: None,
            headers_config: HashMap::new(),
            created_at: chrono::Utc::now(),
            last_used_at: None,
            error_message: None,
        };

        let client = Arc::new(McpClient::new(config));

        match client.connect().await {
            Ok(()) => {
                let tools = client.list_tools().await;

                if register_tools {
                    let mut registry = self.registry.write().await;
                    for tool_info in &tools {
                        let adapter =
                            McpToolAdapter::new(Arc::clone(&client), tool_info.clone());
                        let name = adapter.definition().name;
                        registry.register(Arc::new(adapter));
                        log::info!(
                            "mcp_tool_registered tool={} server={}",
                            name,
                            instance.name
                        );
                    }
                }

                self.clients
                    .write()
                    .await
                    .insert(server_id.clone(), client);
                instance.status = ServerStatus::Active;
                log::info!(
                    "mcp_server_added server_id={} name={} tools_count={}",
                    server_id,
                    instance.name,
                    tools.len()
                );
            }
            Err(e) => {
                instance.status = ServerStatus::Error;
                instance.error_message = Some(e.to_string());
                log::error!("mcp_server_add_failed server_id={} error={}", server_id, e);
            }
        }

        self.servers
            .write()
            .await
            .insert(server_id, instance.clone());
        instance
    }

    /// Unregister the server's tools, disconnect, and drop the client.
    pub async fn remove_server(&self, server_id: &str) -> bool {
        let Some(client) = self.clients.write().await.remove(server_id) else {
            return false;
        };

        let tools = client.list_tools().await;
        {
            let mut registry = self.registry.write().await;
            for tool_info in &tools {
                registry.unregister(&format!("{}:{}", server_id, tool_info.name));
            }
        }

        client.disconnect().await;
        self.servers.write().await.remove(server_id);
        log::info!("mcp_server_removed server_id={}", server_id);
        true
    }

    pub async fn get_server(&self, server_id: &str) -> Option<McpServerInstance> {
        self.servers.read().await.get(server_id).cloned()
    }

    /// Every known server instance, connected or not.
    pub async fn list_servers(&self) -> Vec<McpServerInstance> {
        let mut servers: Vec<McpServerInstance> =
            self.servers.read().await.values().cloned().collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    /// Tools of one server, or of every connected server.
    pub async fn get_tools(&self, server_id: Option<&str>) -> Vec<McpToolInfo> {
        let clients = self.clients.read().await;
        let selected: Vec<Arc<McpClient>> = match server_id {
            Some(id) => clients.get(id).cloned().into_iter().collect(),
            None => clients.values().cloned().collect(),
        };
        drop(clients);

        let mut tools = Vec::new();
        for client in selected {
            if client.is_connected().await {
                tools.extend(client.list_tools().await);
            }
        }
        tools
    }

    /// Resolve a catalog template id to the single connected server
    /// currently running it, for `mcp:<template>:<tool>` rewriting.
    pub async fn resolve_template(&self, template: &str) -> Option<String> {
        let servers = self.servers.read().await;
        servers
            .values()
            .find(|s| s.status == ServerStatus::Active && s.template.as_deref() == Some(template))
            .map(|s| s.id.clone())
    }

    /// Per-server connection status.
    pub async fn health_check(&self) -> HashMap<String, ServerStatus> {
        let servers = self.servers.read().await;
        let clients = self.clients.read().await;

        let mut status = HashMap::new();
        for (server_id, instance) in servers.iter() {
            let connected = match clients.get(server_id) {
                Some(client) => client.is_connected().await,
                None => false,
            };
            let current = if connected {
                ServerStatus::Active
            } else if instance.status == ServerStatus::Error {
                ServerStatus::Error
            } else {
                ServerStatus::Disconnected
            };
            status.insert(server_id.clone(), current);
        }
        status
    }

    /// Reconnect every persisted server on process start. Partial failures
    /// are written back to the repository and do not block startup.
    pub async fn reconnect_all(&self, repository: &dyn McpServerRepository) -> usize {
        let servers = match repository.list_all().await {
            Ok(servers) => servers,
            Err(e) => {
                log::error!("mcp_reconnect_listing_failed error={}", e);
                return 0;
            }
        };
        log::info!("mcp_servers_found count={}", servers.len());

        let mut connected = 0;
        for server in servers {
            let config = match repository.get_config(&server.id).await {
                Ok(Some(config)) => config,
                Ok(None) => {
                    log::warn!("mcp_server_config_not_found server_id={}", server.id);
                    continue;
                }
                Err(e) => {
                    log::error!("mcp_server_config_error server_id={} error={}", server.id, e);
                    continue;
                }
            };

            let instance = self.add_server(config, true).await;
            let _ = repository
                .update_status(&server.id, instance.status, instance.error_message.clone())
                .await;
            if instance.status == ServerStatus::Active {
                connected += 1;
                log::info!(
                    "mcp_server_reconnected server_id={} name={}",
                    server.id,
                    server.name
                );
            }
        }

        log::info!("mcp_servers_reconnected total={}", connected);
        connected
    }

    /// Disconnect everything and clear the pool.
    pub async fn shutdown(&self) {
        let server_ids: Vec<String> = self.clients.read().await.keys().cloned().collect();
        log::info!("mcp_manager_shutting_down server_count={}", server_ids.len());

        for server_id in server_ids {
            self.remove_server(&server_id).await;
        }

        log::info!("mcp_manager_shutdown_complete");
    }
}
