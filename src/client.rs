/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};

use g3_types::auth::{Password, Username};
use g3_types::net::UpstreamAddr;

use crate::error::{
    FtpAuthStatus, FtpCommandError, FtpConnectError, FtpFileStatError, FtpSessionOpenError,
};
use crate::handler::{select_server_handler, FtpServerHandler};
use crate::transfer::FtpTransferType;
use crate::{
    FtpClientConfig, FtpConnectionProvider, FtpControlChannel, FtpReply, FtpReplyCategory,
    FtpServerFeature, FtpSessionState,
};

pub struct FtpClient<CP, S, E, UD>
where
    CP: FtpConnectionProvider<S, E, UD>,
    S: AsyncRead + AsyncWrite,
    E: std::error::Error,
{
    pub(crate) server: UpstreamAddr,
    pub(crate) conn_provider: CP,
    pub(crate) config: Arc<FtpClientConfig>,
    pub(crate) control: FtpControlChannel<S>,
    pub(crate) server_feature: FtpServerFeature,
    pub(crate) handler: Arc<dyn FtpServerHandler>,
    pub(crate) session: FtpSessionState,
    _phantom_e: PhantomData<E>,
    _phantom_ud: PhantomData<UD>,
}

impl<CP, S, E, UD> FtpClient<CP, S, E, UD>
where
    CP: FtpConnectionProvider<S, E, UD>,
    S: AsyncRead + AsyncWrite + Unpin,
    E: std::error::Error,
{
    #[inline]
    pub fn connection_provider(&self) -> &CP {
        &self.conn_provider
    }

    #[inline]
    pub fn server_handler(&self) -> &dyn FtpServerHandler {
        self.handler.as_ref()
    }

    pub async fn connect_to(
        server: UpstreamAddr,
        mut conn_provider: CP,
        user_data: &UD,
        config: &Arc<FtpClientConfig>,
    ) -> Result<Self, (FtpConnectError<E>, CP)> {
        let control_stream = match tokio::time::timeout(
            config.connect_timeout,
            conn_provider.new_control_connection(&server, user_data),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err((FtpConnectError::ConnectIoError(e), conn_provider));
            }
            Err(_) => {
                return Err((FtpConnectError::ConnectTimedOut, conn_provider));
            }
        };

        let mut control = FtpControlChannel::new(control_stream, config.control);
        let greeting =
            match tokio::time::timeout(config.greeting_timeout, control.wait_greetings()).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(FtpCommandError::ServiceNotAvailable)) => {
                    return Err((FtpConnectError::ServiceNotAvailable, conn_provider));
                }
                Ok(Err(e)) => {
                    return Err((FtpConnectError::GreetingFailed(e), conn_provider));
                }
                Err(_) => {
                    return Err((FtpConnectError::GreetingTimedOut, conn_provider));
                }
            };
        if !matches!(greeting.category(), FtpReplyCategory::PositiveCompletion) {
            return Err((
                FtpConnectError::InvalidReplyCode(greeting.code()),
                conn_provider,
            ));
        }

        let mut greeting_text = greeting.info_lines().join("\n");
        greeting_text.push('\n');
        greeting_text.push_str(greeting.message());
        let handler = select_server_handler(&greeting_text);

        let server_feature = match control.check_server_feature().await {
            Ok(feature) => feature,
            Err(FtpCommandError::ServiceNotAvailable) => {
                return Err((FtpConnectError::ServiceNotAvailable, conn_provider));
            }
            Err(e) => {
                return Err((FtpConnectError::NegotiationFailed(e), conn_provider));
            }
        };
        if server_feature.support_utf8_path() {
            // ignore the server reply
            let _ = control.set_use_utf8().await;
        }

        for site_cmd in handler.post_connect_site_commands() {
            let _ = control.send_site(site_cmd).await;
        }

        Ok(FtpClient {
            server,
            conn_provider,
            config: Arc::clone(config),
            control,
            server_feature,
            handler,
            session: FtpSessionState::new(config.data.encryption),
            _phantom_e: Default::default(),
            _phantom_ud: Default::default(),
        })
    }

    pub(crate) fn ensure_connected(&self) -> Result<(), FtpCommandError> {
        if self.session.is_connected() && self.control.is_connected() {
            Ok(())
        } else {
            Err(FtpCommandError::NotConnected)
        }
    }

    /// Upgrade the control connection with `AUTH TLS`. Must run on an
    /// unencrypted control connection, usually before login.
    pub async fn secure_session(&mut self, user_data: &UD) -> Result<(), FtpConnectError<E>> {
        self.ensure_connected()
            .map_err(FtpConnectError::NegotiationFailed)?;
        self.control
            .request_auth_tls()
            .await
            .map_err(FtpConnectError::NegotiationFailed)?;
        let plain = self
            .control
            .take_stream()
            .ok_or(FtpConnectError::ServiceNotAvailable)?;
        match self
            .conn_provider
            .secure_connection(plain, self.server.host(), user_data)
            .await
        {
            Ok(secured) => {
                self.control.set_stream(secured);
                Ok(())
            }
            Err(e) => {
                self.session.set_disconnected();
                Err(FtpConnectError::ConnectIoError(e))
            }
        }
    }

    /// Negotiate `PBSZ 0` + `PROT P`. Data connections opened afterwards
    /// are handed to the provider for TLS activation.
    pub async fn enable_data_encryption(&mut self) -> Result<(), FtpCommandError> {
        self.ensure_connected()?;
        self.control.request_pbsz_zero().await?;
        self.control.request_prot(true).await?;
        self.session.set_data_encryption(true);
        Ok(())
    }

    pub async fn disable_data_encryption(&mut self) -> Result<(), FtpCommandError> {
        self.ensure_connected()?;
        self.control.request_prot(false).await?;
        self.session.set_data_encryption(false);
        Ok(())
    }

    pub async fn new_user_session(
        &mut self,
        name: Option<&Username>,
        pass: Option<&Password>,
    ) -> Result<(), FtpSessionOpenError> {
        self.ensure_connected().map_err(FtpSessionOpenError::from)?;
        match self.control.send_username(name).await? {
            FtpAuthStatus::NotLoggedIn => return Err(FtpSessionOpenError::NotLoggedIn),
            FtpAuthStatus::LoggedIn => return Ok(()),
            FtpAuthStatus::NeedPassword => {}
            FtpAuthStatus::NeedAccount => return Err(FtpSessionOpenError::AccountIsNeeded),
        }

        match self.control.send_password(pass).await? {
            FtpAuthStatus::NotLoggedIn | FtpAuthStatus::NeedPassword => {
                Err(FtpSessionOpenError::NotLoggedIn)
            }
            FtpAuthStatus::LoggedIn => Ok(()),
            FtpAuthStatus::NeedAccount => Err(FtpSessionOpenError::AccountIsNeeded),
        }
    }

    /// Send QUIT and drop the control connection. Calling it again on a
    /// closed session yields a synthetic reply without network IO.
    pub async fn quit_and_close(&mut self) -> Result<FtpReply, FtpCommandError> {
        if self.ensure_connected().is_err() {
            return Ok(FtpReply::synthetic(200, "Connection already closed."));
        }
        let r = self.control.send_quit().await;
        self.session.set_disconnected();
        r
    }

    pub async fn send_keep_alive(&mut self) -> Result<(), FtpCommandError> {
        self.ensure_connected()?;
        self.control.send_noop().await
    }

    pub async fn abort_transfer(&mut self) -> Result<(), FtpCommandError> {
        self.ensure_connected()?;
        self.control.abort_transfer().await
    }

    pub async fn site_command(&mut self, args: &str) -> Result<FtpReply, FtpCommandError> {
        self.ensure_connected()?;
        self.control.send_site(args).await
    }

    /// Issue TYPE only when the session state requires it: the current
    /// type differs, or the first transfer after connect re-asserts it.
    pub async fn set_transfer_type(
        &mut self,
        ttype: FtpTransferType,
    ) -> Result<(), FtpCommandError> {
        self.ensure_connected()?;
        if !self.session.need_type_command(ttype) {
            return Ok(());
        }
        self.control.request_transfer_type(ttype).await?;
        self.session.note_type_accepted(ttype);
        Ok(())
    }

    pub(crate) async fn use_ascii_transfer(&mut self) -> Result<(), FtpCommandError> {
        self.set_transfer_type(FtpTransferType::Ascii).await
    }

    pub(crate) async fn use_binary_transfer(&mut self) -> Result<(), FtpCommandError> {
        self.set_transfer_type(FtpTransferType::Image).await
    }

    pub async fn request_working_dir(&mut self) -> Result<String, FtpCommandError> {
        self.ensure_connected()?;
        if let Some(cached) = self.session.cached_pwd() {
            return Ok(cached.to_string());
        }
        let path = self.control.request_pwd().await?;
        self.session.set_cached_pwd(path.clone());
        Ok(path)
    }

    pub async fn change_working_dir(&mut self, path: &str) -> Result<(), FtpCommandError> {
        self.ensure_connected()?;
        let r = self.control.change_dir(path).await;
        self.session.invalidate_cached_pwd();
        r
    }

    pub async fn fetch_file_size(&mut self, path: &str) -> Result<Option<u64>, FtpFileStatError> {
        self.ensure_connected().map_err(FtpFileStatError::from)?;
        if !self.server_feature.support_file_size() {
            return Err(FtpFileStatError::FeatUnavailable);
        }
        self.control.request_size(path).await.map_err(Into::into)
    }

    pub async fn fetch_file_mtime(
        &mut self,
        path: &str,
    ) -> Result<Option<DateTime<Utc>>, FtpFileStatError> {
        self.ensure_connected().map_err(FtpFileStatError::from)?;
        if !self.server_feature.support_file_mtime() {
            return Err(FtpFileStatError::FeatUnavailable);
        }
        self.control.request_mtime(path).await.map_err(Into::into)
    }
}
