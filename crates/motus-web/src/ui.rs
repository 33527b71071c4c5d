//! UI overlays using bevy_egui

use bevy::prelude::*;
use bevy_egui::{egui, EguiContexts, EguiPrimaryContextPass};
use chrono::Utc;
use motus_core::catalog::SortOrder;
use motus_core::identity::Role;
use motus_core::motion_file::MotionFileId;
use motus_core::preferences::{ColorTheme, FontSize, UiPreferences};
use motus_scene::viewer::ViewerStatus;
use tokio::sync::watch;
use tracing::warn;

use crate::app::{
    Catalog, NoticeLevel, Notices, PortalInbox, PortalSession, PortalSettings, Preferences, UnreadBadge,
};
use crate::network::{request_motion_files_after, request_storage_token, ApiClient, PendingApi};
use crate::viewer::Viewer;

/// egui's own default body size, in points
const BASE_FONT_POINTS: f32 = 14.0;

pub struct UiPlugin;

impl Plugin for UiPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<UiState>()
            // Main UI system runs in EguiPrimaryContextPass for proper input handling (bevy_egui 0.38+)
            .add_systems(EguiPrimaryContextPass, (apply_ui_preferences, ui_system).chain());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    MotionFiles,
    Messages,
    Accessibility,
}

#[derive(Debug, Default, Resource)]
pub struct UiState {
    pub tab: Tab,
    pub date_input: String,
    pub date_error: Option<String>,
    pub draft: String,
    pub send_error: Option<String>,
}

pub fn status_line(status: &ViewerStatus) -> String {
    match status {
        ViewerStatus::Idle => "Select a motion file to view it".to_string(),
        ViewerStatus::Loading {
            progress: Some(percent),
            ..
        } => format!("Loading model... {}%", percent),
        ViewerStatus::Loading { progress: None, .. } => "Loading model...".to_string(),
        ViewerStatus::Active { file } => format!("Showing motion file {}", file),
        ViewerStatus::Failed { message, .. } => format!("Could not show the model: {}", message),
        ViewerStatus::TornDown => "Viewer closed".to_string(),
    }
}

fn visuals_for(prefs: UiPreferences) -> egui::Visuals {
    let mut visuals = egui::Visuals::dark();
    if prefs.high_contrast() {
        let white = egui::Color32::WHITE;
        visuals.override_text_color = Some(white);
        visuals.panel_fill = egui::Color32::BLACK;
        visuals.window_fill = egui::Color32::BLACK;
        visuals.extreme_bg_color = egui::Color32::BLACK;
        visuals.widgets.noninteractive.bg_stroke = egui::Stroke::new(1.0, white);
        visuals.widgets.inactive.bg_stroke = egui::Stroke::new(1.0, white);
        visuals.selection.stroke = egui::Stroke::new(2.0, egui::Color32::YELLOW);
    }
    visuals
}

fn apply_ui_preferences(
    mut contexts: EguiContexts,
    prefs: Res<Preferences>,
    mut receiver: Local<Option<watch::Receiver<UiPreferences>>>,
) {
    let Ok(ctx) = contexts.ctx_mut() else { return };

    let first = receiver.is_none();
    let receiver = receiver.get_or_insert_with(|| prefs.0.subscribe());
    if !first && !receiver.has_changed().unwrap_or(false) {
        return;
    }
    let current = *receiver.borrow_and_update();
    ctx.set_visuals(visuals_for(current));
    ctx.set_zoom_factor(current.font_size.points() / BASE_FONT_POINTS);
}

#[allow(clippy::too_many_arguments)]
fn ui_system(
    mut contexts: EguiContexts,
    mut state: ResMut<UiState>,
    mut catalog: ResMut<Catalog>,
    viewer: Res<Viewer>,
    settings: Res<PortalSettings>,
    mut prefs: ResMut<Preferences>,
    mut notices: ResMut<Notices>,
    badge: Option<Res<UnreadBadge>>,
    session: Res<PortalSession>,
    api: Res<ApiClient>,
    pending_api: Res<PendingApi>,
    mut inbox: Option<NonSendMut<PortalInbox>>,
) {
    let Ok(ctx) = contexts.ctx_mut() else { return };
    let unread = badge.map(|b| b.0.borrow().count).unwrap_or(0);

    let previous_tab = state.tab;
    egui::TopBottomPanel::top("tabs").show(ctx, |ui| {
        ui.horizontal(|ui| {
            ui.heading("Motus");
            ui.separator();
            ui.selectable_value(&mut state.tab, Tab::MotionFiles, "Motion files");
            let messages = if unread > 0 {
                format!("Messages ({})", unread)
            } else {
                "Messages".to_string()
            };
            ui.selectable_value(&mut state.tab, Tab::Messages, messages);
            ui.selectable_value(&mut state.tab, Tab::Accessibility, "Accessibility");
        });
    });
    if state.tab != previous_tab {
        if let Some(inbox) = inbox.as_mut() {
            inbox.0.set_messages_tab_active(state.tab == Tab::Messages);
        }
    }

    egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
        let status = viewer.0.status().clone();
        ui.horizontal(|ui| {
            ui.label(status_line(&status));
            if let ViewerStatus::Loading {
                progress: Some(percent),
                ..
            } = status
            {
                ui.add(egui::ProgressBar::new(f32::from(percent) / 100.0).desired_width(160.0));
            }
            if matches!(status, ViewerStatus::Failed { .. }) && ui.button("Retry").clicked() {
                // A failed session is rebuilt once the fresh token lands
                request_storage_token(&api, &settings.0.backend.motion_container, &pending_api);
            }
        });

        let mut dismissed = None;
        for (index, notice) in notices.items.iter().enumerate() {
            ui.horizontal(|ui| {
                let color = match notice.level {
                    NoticeLevel::Info => ui.visuals().text_color(),
                    NoticeLevel::Warning => egui::Color32::from_rgb(0xe0, 0xa0, 0x30),
                    NoticeLevel::Error => egui::Color32::from_rgb(0xe0, 0x50, 0x50),
                };
                ui.colored_label(color, &notice.text);
                if ui.small_button("x").clicked() {
                    dismissed = Some(index);
                }
            });
        }
        if let Some(index) = dismissed {
            notices.dismiss(index);
        }
    });

    egui::SidePanel::left("side_panel")
        .default_width(300.0)
        .show(ctx, |ui| match state.tab {
            Tab::MotionFiles => {
                motion_files_panel(ui, &mut state, &mut catalog, &session, &api, &pending_api)
            }
            Tab::Messages => match inbox.as_mut() {
                Some(inbox) => messages_panel(ui, &mut state, inbox, &session),
                None => {
                    ui.label("Messaging is not available for this session.");
                }
            },
            Tab::Accessibility => accessibility_panel(ui, &mut prefs, &mut notices),
        });
}

fn motion_files_panel(
    ui: &mut egui::Ui,
    state: &mut UiState,
    // Kept as ResMut so only real mutations mark the catalog changed
    catalog: &mut ResMut<Catalog>,
    session: &PortalSession,
    api: &ApiClient,
    pending: &PendingApi,
) {
    ui.heading("Motion files");

    ui.horizontal(|ui| {
        let mut order = catalog.0.order();
        egui::ComboBox::from_id_salt("sort_order")
            .selected_text(match order {
                SortOrder::Newest => "Newest first",
                SortOrder::Oldest => "Oldest first",
            })
            .show_ui(ui, |ui| {
                ui.selectable_value(&mut order, SortOrder::Newest, "Newest first");
                ui.selectable_value(&mut order, SortOrder::Oldest, "Oldest first");
            });
        if order != catalog.0.order() {
            catalog.0.set_order(order);
        }

        if let Some(patient) = session.patient {
            if ui.button("Check for new").clicked() {
                let since = catalog
                    .0
                    .visible()
                    .map(|f| f.created_at.date_naive())
                    .max()
                    .unwrap_or_else(|| Utc::now().date_naive());
                request_motion_files_after(api, patient, since, pending);
            }
        }
    });

    ui.horizontal(|ui| {
        ui.add(
            egui::TextEdit::singleline(&mut state.date_input)
                .hint_text("YYYY-MM-DD")
                .desired_width(110.0),
        );
        if ui.button("Filter").clicked() {
            state.date_error = catalog
                .0
                .filter_by_date(&state.date_input)
                .err()
                .map(|e| e.to_string());
        }
        if catalog.0.date_filter().is_some() && ui.button("Clear").clicked() {
            catalog.0.clear_filter();
            state.date_input.clear();
            state.date_error = None;
        }
    });
    if let Some(error) = &state.date_error {
        ui.colored_label(egui::Color32::from_rgb(0xe0, 0x50, 0x50), error);
    }
    ui.separator();

    if catalog.0.is_empty() {
        ui.label("No motion files yet.");
        return;
    }

    let selected = catalog.0.selected().map(|f| f.id);
    let rows: Vec<(MotionFileId, String)> = catalog
        .0
        .visible()
        .map(|f| (f.id, format!("{}  ({})", f.name, f.upload_date())))
        .collect();
    let mut clicked = None;
    egui::ScrollArea::vertical().show(ui, |ui| {
        for (id, label) in &rows {
            if ui.selectable_label(selected == Some(*id), label).clicked() {
                clicked = Some(*id);
            }
        }
    });
    if let Some(id) = clicked {
        if let Err(e) = catalog.0.select(id) {
            warn!(error = %e, "Failed to select motion file");
        }
    }
}

fn messages_panel(ui: &mut egui::Ui, state: &mut UiState, inbox: &mut PortalInbox, session: &PortalSession) {
    let me = inbox.0.identity().user_id;
    let counterpart = match inbox.0.identity().role {
        Role::Patient => "Physician",
        _ => "Patient",
    };
    match session.conversation {
        Some(conversation) => ui.heading(format!("Conversation {}", conversation)),
        None => ui.heading("Messages"),
    };

    egui::ScrollArea::vertical()
        .stick_to_bottom(true)
        .max_height(ui.available_height() - 80.0)
        .show(ui, |ui| {
            if inbox.0.timeline().is_empty() {
                ui.label("No messages yet.");
            }
            for message in inbox.0.timeline() {
                let who = if message.sender == me { "You" } else { counterpart };
                ui.label(
                    egui::RichText::new(format!("{} · {}", who, message.timestamp.format("%Y-%m-%d %H:%M")))
                        .small()
                        .weak(),
                );
                let mut text = egui::RichText::new(&message.content);
                if inbox.0.is_unread(message) {
                    text = text.strong();
                }
                ui.label(text);
                ui.add_space(4.0);
            }
        });

    ui.separator();
    let response = ui.add(
        egui::TextEdit::singleline(&mut state.draft)
            .hint_text("Write a message")
            .desired_width(f32::INFINITY),
    );
    let enter = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
    if ui.button("Send").clicked() || enter {
        // The timeline updates when the backend echoes the message back
        match inbox.0.send(&state.draft) {
            Ok(()) => {
                state.draft.clear();
                state.send_error = None;
            }
            Err(e) => state.send_error = Some(e.to_string()),
        }
    }
    if let Some(error) = &state.send_error {
        ui.colored_label(egui::Color32::from_rgb(0xe0, 0x50, 0x50), error);
    }
}

fn accessibility_panel(ui: &mut egui::Ui, prefs: &mut Preferences, notices: &mut Notices) {
    ui.heading("Accessibility");
    let mut wanted = prefs.0.current();

    ui.label("Colour theme");
    ui.radio_value(&mut wanted.color_theme, ColorTheme::Default, "Default");
    ui.radio_value(&mut wanted.color_theme, ColorTheme::Colorblind, "Colorblind friendly");
    ui.radio_value(&mut wanted.color_theme, ColorTheme::HighContrast, "High contrast");
    ui.add_space(8.0);

    ui.label("Text size");
    for size in [FontSize::Small, FontSize::Medium, FontSize::Large] {
        ui.radio_value(&mut wanted.font_size, size, size.as_str());
    }

    if let Err(e) = prefs.0.update(wanted) {
        warn!(error = %e, "Failed to save preferences");
        notices.push(NoticeLevel::Warning, format!("Could not save preferences: {}", e));
    }

    ui.add_space(8.0);
    if ui.button("Reset to defaults").clicked() {
        if let Err(e) = prefs.0.reset() {
            notices.push(NoticeLevel::Warning, format!("Could not reset preferences: {}", e));
        }
    }
}
