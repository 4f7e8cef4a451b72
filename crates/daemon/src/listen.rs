// Copyright (C) 2024 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::connection::{ConnectionContext, serve_connection};
use corral_var::SYSTEM_OBJECT;
use eyre::WrapErr;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Bind one listener and accept forever, a task per connection. The
/// address may be v4 or v6; both are just socket addresses here.
pub async fn listen_loop(ctx: Arc<ConnectionContext>, addr: SocketAddr) -> eyre::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("cannot listen on {addr}"))?;
    ctx.registry.add_listener(SYSTEM_OBJECT, addr.port());
    info!("Listening on {addr}");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let _ = stream.set_nodelay(true);
                tokio::spawn(serve_connection(ctx.clone(), stream, peer));
            }
            Err(e) => {
                error!("accept on {addr} failed: {e}");
            }
        }
    }
}
