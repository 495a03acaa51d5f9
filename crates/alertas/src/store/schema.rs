//! Schema for alertas.db — engine tables plus the CRUD-owned read side.

pub const MIGRATION_SQL: &str = r"
-- Tables owned by the projects CRUD subsystem. The engine only reads
-- these; they are created here so an empty database is usable in
-- development and tests.
CREATE TABLE IF NOT EXISTS obras (
    id TEXT PRIMARY KEY,
    tenant_id TEXT,
    nome TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'em_andamento',
    data_inicio TEXT
) STRICT;

CREATE TABLE IF NOT EXISTS orcamento (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    obra_id TEXT NOT NULL,
    categoria TEXT,
    custo REAL NOT NULL DEFAULT 0
) STRICT;

CREATE INDEX IF NOT EXISTS idx_orcamento_obra ON orcamento(obra_id);

CREATE TABLE IF NOT EXISTS despesas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    obra_id TEXT NOT NULL,
    categoria TEXT,
    custo REAL NOT NULL DEFAULT 0,
    data_despesa TEXT
) STRICT;

CREATE INDEX IF NOT EXISTS idx_despesas_obra ON despesas(obra_id);

-- Engine-owned: one active threshold configuration per project.
-- Deactivated rows are kept for audit.
CREATE TABLE IF NOT EXISTS configuracoes_alerta (
    id TEXT PRIMARY KEY,
    obra_id TEXT NOT NULL,
    tenant_id TEXT,
    threshold_baixo REAL NOT NULL,
    threshold_medio REAL NOT NULL,
    threshold_alto REAL NOT NULL,
    threshold_critico REAL NOT NULL,
    notificar_email INTEGER NOT NULL DEFAULT 0,
    notificar_dashboard INTEGER NOT NULL DEFAULT 1,
    ativo INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) STRICT;

CREATE UNIQUE INDEX IF NOT EXISTS idx_config_obra_ativa
    ON configuracoes_alerta(obra_id) WHERE ativo = 1;

-- Engine-owned: deviation alerts.
CREATE TABLE IF NOT EXISTS alertas_desvio (
    id TEXT PRIMARY KEY,
    obra_id TEXT NOT NULL,
    tenant_id TEXT,
    tipo_alerta TEXT NOT NULL,
    percentual_desvio REAL NOT NULL,
    valor_orcado REAL NOT NULL,
    valor_realizado REAL NOT NULL,
    valor_desvio REAL NOT NULL,
    categoria TEXT,
    descricao TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'ATIVO',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) STRICT;

CREATE INDEX IF NOT EXISTS idx_alertas_obra ON alertas_desvio(obra_id);
CREATE INDEX IF NOT EXISTS idx_alertas_status ON alertas_desvio(status);
CREATE INDEX IF NOT EXISTS idx_alertas_created
    ON alertas_desvio(created_at DESC);

-- At most one ATIVO alert per (project, category scope). NULL categoria
-- is the overall scope, folded to '' so the index covers it.
CREATE UNIQUE INDEX IF NOT EXISTS idx_alertas_ativo_escopo
    ON alertas_desvio(obra_id, COALESCE(categoria, '')) WHERE status = 'ATIVO';

-- Engine-owned: append-only lifecycle log.
CREATE TABLE IF NOT EXISTS historico_alertas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alerta_id TEXT NOT NULL,
    obra_id TEXT NOT NULL,
    tenant_id TEXT,
    tipo_alerta TEXT NOT NULL,
    percentual_desvio REAL NOT NULL,
    valor_orcado REAL NOT NULL,
    valor_realizado REAL NOT NULL,
    valor_desvio REAL NOT NULL,
    acao TEXT NOT NULL,
    registrado_em TEXT NOT NULL
) STRICT;

CREATE INDEX IF NOT EXISTS idx_historico_alerta
    ON historico_alertas(alerta_id);
";
